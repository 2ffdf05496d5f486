pub mod config;
pub mod epoch;
pub mod error;
pub mod events;
pub mod pictures;
pub mod schedule;
pub mod sequence;
pub mod store;
pub mod tasks {
    pub mod files;
    pub mod rotation;
}
