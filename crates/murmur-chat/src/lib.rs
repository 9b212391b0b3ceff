pub mod aggregator;
pub mod fanout;
pub mod pipeline;
pub mod profile;
pub mod settings;

pub use aggregator::ChatAggregator;
pub use pipeline::{ChatPipeline, SentMessage};
pub use profile::{HttpProfileClient, ProfileClient};
pub use settings::ChatSettings;
