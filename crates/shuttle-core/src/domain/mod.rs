//! Domain model (IDs, batch, lifecycle state, errors).

pub mod batch;
pub mod errors;
pub mod ids;
pub mod state;

pub use self::batch::Batch;
pub use self::errors::{
    BoxError, ConfigError, DeliveryError, ProducerError, PublisherPanicked, SharedError, SubmitError,
};
pub use self::ids::{BatchId, ProducerId};
pub use self::state::ProducerState;
