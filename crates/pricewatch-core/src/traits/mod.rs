//! Collaborator traits: the only way the engine reaches the outside world.

pub mod notifier;
pub mod repository;
pub mod scraper;

pub use notifier::Notifier;
pub use repository::Repository;
pub use scraper::Scraper;
