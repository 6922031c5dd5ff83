pub mod bulk;
pub mod dispatch;
pub mod metadata;
pub mod pipeline;
