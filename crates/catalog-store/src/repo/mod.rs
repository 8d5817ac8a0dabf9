//! Repository layer mapping the catalog model onto SQLite

pub mod change_repo;
pub mod entity_repo;

pub use change_repo::ChangeRepo;
pub use entity_repo::EntityRepo;
