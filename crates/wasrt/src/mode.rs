use {
    crate::{
        error::{InferError, Result},
        model::{
            buffer::ContextBuffer,
            fusion::{append_target, stack_frames},
        },
    },
    candle_core::Tensor,
    serde::{Deserialize, Serialize},
    std::{fmt, str::FromStr},
};

/// How a model instance obtains temporal context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// One frame per call; history lives in the instance's context buffer.
    Sequential,
    /// Batched; every call supplies its own history frames.
    Unrolled,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Sequential => write!(f, "sequential"),
            Mode::Unrolled => write!(f, "unrolled"),
        }
    }
}

impl FromStr for Mode {
    type Err = InferError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(Mode::Sequential),
            "unrolled" => Ok(Mode::Unrolled),
            other => Err(InferError::Config(format!("unsupported mode '{other}'"))),
        }
    }
}

/// Source of the context frames that precede a target.
///
/// `assemble` builds the `[B, T, C, h, w]` fusion input with the target last
/// and must not change any state; `commit` runs only once the whole forward
/// pass has succeeded.
pub trait ContextStrategy {
    fn assemble(&self, target: &Tensor) -> Result<Tensor>;

    fn commit(&mut self, _target: &Tensor) {}
}

/// Sequential context: reads from and advances a `ContextBuffer`.
pub struct BufferedContext<'a> {
    buffer: &'a mut ContextBuffer<Tensor>,
}

impl<'a> BufferedContext<'a> {
    pub fn new(buffer: &'a mut ContextBuffer<Tensor>) -> Self {
        Self { buffer }
    }
}

impl ContextStrategy for BufferedContext<'_> {
    fn assemble(&self, target: &Tensor) -> Result<Tensor> {
        if self.buffer.is_seeded() {
            stack_frames(&self.buffer.snapshot(), target)
        } else {
            // What the buffer will hold once seeded from this frame.
            let seed = vec![target.clone(); self.buffer.capacity()];
            stack_frames(&seed, target)
        }
    }

    fn commit(&mut self, target: &Tensor) {
        if !self.buffer.is_seeded() {
            base::log_debug!(
                "seeding context buffer with {} copies of the first frame",
                self.buffer.capacity()
            );
            self.buffer.seed(target.clone());
        } else {
            self.buffer.push(target.clone());
        }
    }
}

/// Unrolled context: a caller-supplied `[B, T-1, C, h, w]` history. Holds no state.
pub struct ExplicitContext {
    history: Tensor,
}

impl ExplicitContext {
    pub fn new(history: Tensor) -> Self {
        Self { history }
    }
}

impl ContextStrategy for ExplicitContext {
    fn assemble(&self, target: &Tensor) -> Result<Tensor> {
        append_target(&self.history, target)
    }
}
