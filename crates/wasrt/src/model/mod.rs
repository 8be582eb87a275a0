pub mod blocks;
pub mod buffer;
pub mod decoder;
pub mod encoder;
pub mod fusion;

pub use buffer::ContextBuffer;
pub use encoder::Features;
pub use fusion::TemporalFusion;

use {
    crate::{
        WasrConfig,
        error::{InferError, Result},
        mode::{BufferedContext, ContextStrategy, ExplicitContext, Mode},
    },
    candle_core::{DType, Device, Tensor},
    candle_nn::VarBuilder,
    decoder::Decoder,
    encoder::Encoder,
};

/// Frames for one call, mirroring the `image` / `hist_images` pair the model
/// is trained on.
#[derive(Debug, Clone)]
pub struct TemporalInput {
    /// `[B, 3, H, W]` target frames.
    pub image: Tensor,
    /// `[B, T-1, 3, H, W]` past frames, oldest first. Unrolled mode only.
    pub hist_images: Option<Tensor>,
}

impl TemporalInput {
    pub fn sequential(image: Tensor) -> Self {
        Self {
            image,
            hist_images: None,
        }
    }

    pub fn unrolled(image: Tensor, hist_images: Tensor) -> Self {
        Self {
            image,
            hist_images: Some(hist_images),
        }
    }
}

/// Model output.
#[derive(Debug, Clone)]
pub struct Prediction {
    /// `[B, num_classes, H, W]` class scores.
    pub out: Tensor,
}

impl Prediction {
    /// Per-pixel argmax as `[B, H, W]` u8 class indices.
    pub fn classes(&self) -> Result<Tensor> {
        Ok(self.out.argmax(1)?.to_dtype(DType::U8)?)
    }

    /// Class mask of one batch element, copied to the host as `[H, W]`.
    pub fn to_mask(&self, index: usize) -> Result<base::Tensor<u8>> {
        let (b, _, h, w) = self.out.dims4()?;
        if index >= b {
            return Err(InferError::Shape(format!(
                "mask index {index} out of range for batch of {b}"
            )));
        }
        let data = self.classes()?.get(index)?.flatten_all()?.to_vec1::<u8>()?;
        Ok(base::Tensor::new(vec![h, w], data)?)
    }
}

/// Parameters shared by both modes.
#[derive(Debug)]
struct Network {
    encoder: Encoder,
    fusion: TemporalFusion,
    decoder: Decoder,
}

impl Network {
    fn run(
        &self,
        features: &Features,
        context: &mut impl ContextStrategy,
        output_hw: (usize, usize),
    ) -> Result<Tensor> {
        let stack = context.assemble(&features.out)?;
        let fused = self.fusion.forward(&stack)?;
        let logits = self.decoder.forward(features, &fused, output_hw)?;
        context.commit(&features.out);
        Ok(logits)
    }
}

/// Temporal maritime segmentation model.
///
/// One set of weights serves both modes. In `Mode::Sequential` the instance
/// owns a context buffer for exactly one video stream: frames must arrive in
/// order, and `reset_context` must be called before starting another stream,
/// otherwise the new stream silently inherits the old one's history. An
/// instance must not be driven from several threads at once.
#[derive(Debug)]
pub struct WasrT {
    net: Network,
    config: WasrConfig,
    mode: Mode,
    buffer: ContextBuffer<Tensor>,
    device: Device,
}

impl WasrT {
    pub fn load(vb: VarBuilder, config: WasrConfig) -> Result<Self> {
        config.validate()?;
        let widths = config.backbone.widths();
        let device = vb.device().clone();

        let encoder = Encoder::load(vb.pp("encoder"), &widths)?;
        let fusion = TemporalFusion::load(
            vb.pp("temporal"),
            widths.stages[3],
            widths.context,
            config.context_length,
        )?;
        let decoder = Decoder::load(vb.pp("decoder"), &widths, config.num_classes)?;

        Ok(Self {
            net: Network {
                encoder,
                fusion,
                decoder,
            },
            mode: config.mode,
            buffer: ContextBuffer::new(config.hist_len()),
            config,
            device,
        })
    }

    pub fn config(&self) -> &WasrConfig {
        &self.config
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn dtype(&self) -> DType {
        self.config.dtype()
    }

    pub fn to_sequential(mut self) -> Self {
        self.set_mode(Mode::Sequential);
        self
    }

    pub fn to_unrolled(mut self) -> Self {
        self.set_mode(Mode::Unrolled);
        self
    }

    /// Switches mode in place. The context buffer always starts empty afterwards.
    pub fn set_mode(&mut self, mode: Mode) {
        if self.mode != mode {
            base::log_info!("WaSR-T mode: {} -> {}", self.mode, mode);
        }
        self.mode = mode;
        self.buffer.clear();
    }

    /// Forgets all buffered history; the next frame re-seeds the buffer.
    pub fn reset_context(&mut self) -> Result<()> {
        if self.mode != Mode::Sequential {
            return Err(InferError::Mode(
                "reset_context is only valid in sequential mode".to_string(),
            ));
        }
        base::log_debug!("context buffer reset");
        self.buffer.clear();
        Ok(())
    }

    /// Buffered context feature maps, oldest first. Empty until the first frame.
    pub fn context_snapshot(&self) -> Vec<Tensor> {
        self.buffer.snapshot()
    }

    pub fn is_context_seeded(&self) -> bool {
        self.buffer.is_seeded()
    }

    /// Encodes `[B, 3, H, W]` frames. Pure; never touches the context buffer.
    pub fn encode(&self, frames: &Tensor) -> Result<Features> {
        self.check_frames(frames, "image")?;
        let frames = self.prepare(frames)?;
        Ok(self.net.encoder.forward_features(&frames)?)
    }

    /// Dispatches on the current mode.
    pub fn forward(&mut self, input: &TemporalInput) -> Result<Prediction> {
        match (self.mode, &input.hist_images) {
            (Mode::Sequential, None) => self.forward_sequential(&input.image),
            (Mode::Sequential, Some(_)) => Err(InferError::Mode(
                "sequential mode takes history from the context buffer; hist_images must be empty"
                    .to_string(),
            )),
            (Mode::Unrolled, Some(hist)) => self.forward_unrolled(&input.image, hist),
            (Mode::Unrolled, None) => Err(InferError::Shape(format!(
                "unrolled mode requires hist_images of shape [B, {}, 3, H, W]",
                self.config.hist_len()
            ))),
        }
    }

    /// Processes the next frame `[1, 3, H, W]` of the current sequence.
    pub fn forward_sequential(&mut self, frame: &Tensor) -> Result<Prediction> {
        if self.mode != Mode::Sequential {
            return Err(InferError::Mode(format!(
                "forward_sequential called in {} mode",
                self.mode
            )));
        }
        let (b, _, _, _) = self.check_frames(frame, "image")?;
        if b != 1 {
            return Err(InferError::Shape(format!(
                "sequential mode processes one frame per call, got a batch of {b}"
            )));
        }

        let features = self.net.encoder.forward_features(&self.prepare(frame)?)?;
        let mut context = BufferedContext::new(&mut self.buffer);
        let out = self
            .net
            .run(&features, &mut context, self.config.image_size)?;
        Ok(Prediction { out })
    }

    /// Segments `[B, 3, H, W]` targets given `[B, T-1, 3, H, W]` histories.
    pub fn forward_unrolled(&self, frames: &Tensor, hist: &Tensor) -> Result<Prediction> {
        if self.mode != Mode::Unrolled {
            return Err(InferError::Mode(format!(
                "forward_unrolled called in {} mode",
                self.mode
            )));
        }
        let (b, _, h, w) = self.check_frames(frames, "image")?;
        let (hb, ht, hc, hh, hw) = hist.dims5().map_err(|_| {
            InferError::Shape(format!(
                "hist_images must be [B, T-1, 3, H, W], got {:?}",
                hist.dims()
            ))
        })?;
        if hb != b {
            return Err(InferError::Shape(format!(
                "hist_images batch {hb} does not match image batch {b}"
            )));
        }
        if ht != self.config.hist_len() {
            return Err(InferError::Shape(format!(
                "expected {} history frames per example, got {}",
                self.config.hist_len(),
                ht
            )));
        }
        if hc != 3 || (hh, hw) != (h, w) {
            return Err(InferError::Shape(format!(
                "history frames must be 3x{h}x{w}, got {hc}x{hh}x{hw}"
            )));
        }

        let features = self.net.encoder.forward_features(&self.prepare(frames)?)?;
        let hist = self.prepare(&hist.flatten(0, 1)?)?;
        let hist_out = self.net.encoder.forward_features(&hist)?.out;
        let (_, c, fh, fw) = hist_out.dims4()?;
        let history = hist_out.reshape((b, ht, c, fh, fw))?;

        let mut context = ExplicitContext::new(history);
        let out = self
            .net
            .run(&features, &mut context, self.config.image_size)?;
        Ok(Prediction { out })
    }

    fn check_frames(&self, frames: &Tensor, name: &str) -> Result<(usize, usize, usize, usize)> {
        let (b, c, h, w) = frames.dims4().map_err(|_| {
            InferError::Shape(format!("{name} must be [B, 3, H, W], got {:?}", frames.dims()))
        })?;
        if b == 0 {
            return Err(InferError::Shape(format!("{name} batch is empty")));
        }
        if c != 3 {
            return Err(InferError::Shape(format!(
                "{name} must have 3 channels, got {c}"
            )));
        }
        if (h, w) != self.config.image_size {
            return Err(InferError::Shape(format!(
                "{name} resolution {h}x{w} does not match configured {}x{}",
                self.config.image_size.0, self.config.image_size.1
            )));
        }
        Ok((b, c, h, w))
    }

    fn prepare(&self, frames: &Tensor) -> Result<Tensor> {
        Ok(frames.to_device(&self.device)?.to_dtype(self.dtype())?)
    }
}
