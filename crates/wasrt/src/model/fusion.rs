use {
    super::blocks::pointwise,
    crate::error::{InferError, Result},
    candle_core::Tensor,
    candle_nn::{Conv2d, Conv2dConfig, Module, VarBuilder, init},
};

/// Temporal context module.
///
/// Each frame's features are projected to `out_channels` with a shared 1x1
/// convolution, then a convolution spanning all `frames` time steps and a 3x3
/// spatial window collapses the stack into one context map. The temporal
/// kernel covers the whole window without padding, which makes it equal to
/// a 2D convolution over the time-major channel concatenation; that is how it
/// runs here. Weights are stored in 3D layout `[out, in, frames, 3, 3]`.
#[derive(Debug)]
pub struct TemporalFusion {
    project: Conv2d,
    temporal: Conv2d,
    in_channels: usize,
    out_channels: usize,
    frames: usize,
}

impl TemporalFusion {
    pub fn load(
        vb: VarBuilder,
        in_channels: usize,
        out_channels: usize,
        frames: usize,
    ) -> candle_core::Result<Self> {
        let project = pointwise(vb.pp("project"), in_channels, out_channels)?;

        let tvb = vb.pp("temporal");
        let weight = tvb.get_with_hints(
            (out_channels, out_channels, frames, 3, 3),
            "weight",
            init::DEFAULT_KAIMING_NORMAL,
        )?;
        let bias = tvb.get_with_hints(out_channels, "bias", init::ZERO)?;
        // [out, in, t, kh, kw] -> [out, t * in, kh, kw], channel index t * in + c
        let weight = weight
            .permute((0, 2, 1, 3, 4))?
            .contiguous()?
            .reshape((out_channels, frames * out_channels, 3, 3))?;
        let temporal = Conv2d::new(
            weight,
            Some(bias),
            Conv2dConfig {
                padding: 1,
                ..Default::default()
            },
        );

        Ok(Self {
            project,
            temporal,
            in_channels,
            out_channels,
            frames,
        })
    }

    /// Fuses a `[B, T, C, h, w]` stack (oldest first, target last) into `[B, C', h, w]`.
    pub fn forward(&self, stack: &Tensor) -> Result<Tensor> {
        let (b, t, c, h, w) = stack.dims5().map_err(|_| {
            InferError::Shape(format!(
                "fusion expects a [B, T, C, h, w] stack, got {:?}",
                stack.dims()
            ))
        })?;
        if t != self.frames {
            return Err(InferError::Shape(format!(
                "fusion expects {} frames per stack, got {}",
                self.frames, t
            )));
        }
        if c != self.in_channels {
            return Err(InferError::Shape(format!(
                "fusion expects {} feature channels, got {}",
                self.in_channels, c
            )));
        }

        let projected = self.project.forward(&stack.reshape((b * t, c, h, w))?)?;
        let stacked = projected.reshape((b, t * self.out_channels, h, w))?;
        Ok(self.temporal.forward(&stacked)?.relu()?)
    }
}

/// Stacks per-frame `[B, C, h, w]` maps along a new time axis, target last.
pub fn stack_frames(context: &[Tensor], target: &Tensor) -> Result<Tensor> {
    let mut frames: Vec<&Tensor> = context.iter().collect();
    frames.push(target);
    Ok(Tensor::stack(&frames, 1)?)
}

/// Appends the target to an explicit `[B, T-1, C, h, w]` history.
pub fn append_target(history: &Tensor, target: &Tensor) -> Result<Tensor> {
    Ok(Tensor::cat(&[history, &target.unsqueeze(1)?], 1)?)
}
