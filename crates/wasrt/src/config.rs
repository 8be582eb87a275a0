use {
    crate::{
        Mode,
        error::{InferError, Result},
    },
    candle_core::DType,
    serde::{Deserialize, Serialize},
    std::{fmt, path::Path, str::FromStr},
};

/// Total downsampling of the encoder's deepest feature map.
pub const OUTPUT_STRIDE: usize = 32;

/// Encoder variant.
///
/// Both variants are compact residual encoders that keep the channel
/// progression of the network they are named after, not its depth: two
/// residual blocks per stage for `ResNet101`, one for `MobileNetV3`.
/// Checkpoints must be exported for this layout; torchvision ResNet-101 or
/// MobileNetV3 weights do not load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Backbone {
    #[serde(rename = "resnet101")]
    ResNet101,
    #[serde(rename = "mobilenet_v3")]
    MobileNetV3,
}

/// Channel layout of one encoder variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Widths {
    pub stem: usize,
    /// Stage outputs at strides 4, 8, 16 and 32.
    pub stages: [usize; 4],
    /// Residual blocks per stage.
    pub depth: usize,
    /// Channels of the fused temporal context.
    pub context: usize,
    pub decoder: usize,
}

impl Backbone {
    pub fn widths(&self) -> Widths {
        match self {
            Backbone::ResNet101 => Widths {
                stem: 64,
                stages: [64, 128, 256, 512],
                depth: 2,
                context: 128,
                decoder: 128,
            },
            Backbone::MobileNetV3 => Widths {
                stem: 16,
                stages: [24, 40, 80, 160],
                depth: 1,
                context: 40,
                decoder: 64,
            },
        }
    }

    /// Recognises a variant by the output width of its stem convolution.
    pub fn from_stem_width(width: usize) -> Option<Self> {
        [Backbone::ResNet101, Backbone::MobileNetV3]
            .into_iter()
            .find(|b| b.widths().stem == width)
    }
}

impl fmt::Display for Backbone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backbone::ResNet101 => write!(f, "resnet101"),
            Backbone::MobileNetV3 => write!(f, "mobilenet_v3"),
        }
    }
}

impl FromStr for Backbone {
    type Err = InferError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "resnet101" => Ok(Backbone::ResNet101),
            "mobilenet_v3" | "mobilenetv3" => Ok(Backbone::MobileNetV3),
            other => Err(InferError::Config(format!("unsupported backbone '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    F32,
    F16,
}

impl Precision {
    pub fn dtype(&self) -> DType {
        match self {
            Precision::F32 => DType::F32,
            Precision::F16 => DType::F16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WasrConfig {
    pub backbone: Backbone,
    pub num_classes: usize,
    /// Frames seen per prediction: the target plus `context_length - 1` past frames.
    pub context_length: usize,
    pub mobile: bool,
    /// Input resolution as (height, width).
    pub image_size: (usize, usize),
    pub precision: Precision,
    pub mode: Mode,
}

impl Default for WasrConfig {
    fn default() -> Self {
        Self {
            backbone: Backbone::ResNet101,
            num_classes: 3,
            context_length: 5,
            mobile: false,
            image_size: (384, 512),
            precision: Precision::F32,
            mode: Mode::Unrolled,
        }
    }
}

impl WasrConfig {
    /// Reduced-resolution profile for embedded deployments.
    pub fn mobile() -> Self {
        Self {
            backbone: Backbone::MobileNetV3,
            mobile: true,
            image_size: (192, 256),
            ..Self::default()
        }
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_image_size(mut self, height: usize, width: usize) -> Self {
        self.image_size = (height, width);
        self
    }

    pub fn with_context_length(mut self, context_length: usize) -> Self {
        self.context_length = context_length;
        self
    }

    pub fn with_num_classes(mut self, num_classes: usize) -> Self {
        self.num_classes = num_classes;
        self
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_precision(mut self, precision: Precision) -> Self {
        self.precision = precision;
        self
    }

    /// Number of past frames held as context (T-1).
    pub fn hist_len(&self) -> usize {
        self.context_length.saturating_sub(1)
    }

    pub fn dtype(&self) -> DType {
        self.precision.dtype()
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_classes == 0 || self.num_classes > u8::MAX as usize + 1 {
            return Err(InferError::Config(format!(
                "num_classes must be in 1..=256, got {}",
                self.num_classes
            )));
        }
        if self.context_length < 2 {
            return Err(InferError::Config(format!(
                "context_length must include at least one past frame, got {}",
                self.context_length
            )));
        }
        let (h, w) = self.image_size;
        if h == 0 || w == 0 || h % OUTPUT_STRIDE != 0 || w % OUTPUT_STRIDE != 0 {
            return Err(InferError::Config(format!(
                "image size {}x{} must be a non-zero multiple of {}",
                h, w, OUTPUT_STRIDE
            )));
        }
        if self.mobile && self.backbone != Backbone::MobileNetV3 {
            return Err(InferError::Config(format!(
                "mobile profile requires the mobilenet_v3 backbone, got {}",
                self.backbone
            )));
        }
        Ok(())
    }
}
