pub mod core;
pub mod bitmap;
pub mod catalog;
pub mod query;
pub mod engine;

/*
┌──────────────────────────── BITSIFT ARCHITECTURE ────────────────────────────┐
│                                                                              │
│  Engine<Item, PK>                                                            │
│    ├── catalogs: Vec<Box<dyn EngineCatalog>>   // one per declared attribute │
│    │      └── CatalogSlot { Catalog<K>, key extractor }                      │
│    ├── primary_key_to_position: HashMap<PK, u32>                             │
│    ├── position_to_primary_key: Vec<Option<PK>>  // None = tombstone         │
│    └── active: Vector                           // live-position universe    │
│                                                                              │
│  Catalog<K>                                                                  │
│    └── entries: BTreeMap<K, CatalogEntry>       // ordered for range/sort    │
│           └── CatalogEntry { vector: Vector, optimized: Idle|Ready|Dead }    │
│                                                                              │
│  Vector            // WAH bitmap: literal words + run-length fills           │
│    ├── words: Vec<Word>                         // last word always literal  │
│    └── kernels: bitmap::logic | bitmap::logic_unsafe (allow_unsafe)          │
│                                                                              │
│  Query<'engine>                                                              │
│    ├── filter: FilterClause (Leaf | And | Or | Not, flattened)               │
│    ├── sorts / sort_by_primary_key, facets, amongst                          │
│    └── execute(skip, take) -> QueryResult       // one-shot, atomic latch    │
│                                                                              │
│  Flow: add_catalog* -> add items (bit positions) -> create_query             │
│        -> filter tree folds catalog vectors -> candidate                     │
│        -> population = total, sort walk pages keys, facets count per key     │
│        remove marks tombstones; compact remaps every vector in two phases    │
└──────────────────────────────────────────────────────────────────────────────┘
*/
