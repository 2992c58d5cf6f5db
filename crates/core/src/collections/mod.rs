//! Collections backing destination sets, receive filters and the source table.

mod hash_table;

pub use hash_table::{HashIndex, HashTable, IndexFn, KeyHashTable};
