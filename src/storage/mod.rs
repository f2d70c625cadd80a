pub mod entities;
pub mod group_index;
pub mod groups;
pub mod keys;
pub mod memory;
pub mod pager;
pub mod sqlite;
pub mod store;
pub mod user_index;
