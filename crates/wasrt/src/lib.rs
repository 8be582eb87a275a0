//! WaSR-T: temporal maritime obstacle segmentation on candle.
//!
//! A shared encoder, a temporal fusion module and a decoder are driven in one
//! of two modes. `Mode::Unrolled` takes each example's past frames explicitly
//! and suits batched evaluation; `Mode::Sequential` keeps the past frames'
//! features in a per-instance buffer and suits live video. Both modes compute
//! the same prediction for the same frame history.

pub mod config;
pub mod error;
pub mod inference;
pub mod mode;
pub mod model;
pub mod segmenter;
pub mod weights;

pub use config::{Backbone, Precision, WasrConfig};
pub use error::InferError;
pub use inference::Inference;
pub use mode::Mode;
pub use model::{ContextBuffer, Features, Prediction, TemporalInput, WasrT};
pub use segmenter::{SegmentationMask, Segmenter};
