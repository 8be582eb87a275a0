use {
    super::blocks::{ConvBlock, Stage},
    crate::config::Widths,
    candle_core::{Result, Tensor},
    candle_nn::{Module, VarBuilder},
};

/// Multi-scale features of a batch of frames.
#[derive(Debug, Clone)]
pub struct Features {
    /// Stride 4.
    pub skip1: Tensor,
    /// Stride 8.
    pub skip2: Tensor,
    /// Stride 32, the scale temporal context is fused at.
    pub out: Tensor,
}

/// Shared frame encoder. Stateless: every frame is encoded independently.
#[derive(Debug)]
pub struct Encoder {
    stem: ConvBlock,
    stages: [Stage; 4],
}

impl Encoder {
    pub fn load(vb: VarBuilder, widths: &Widths) -> Result<Self> {
        let stem = ConvBlock::down(vb.pp("stem"), 3, widths.stem)?;
        let [c1, c2, c3, c4] = widths.stages;
        let stages = [
            Stage::load(vb.pp("stage1"), widths.stem, c1, widths.depth)?,
            Stage::load(vb.pp("stage2"), c1, c2, widths.depth)?,
            Stage::load(vb.pp("stage3"), c2, c3, widths.depth)?,
            Stage::load(vb.pp("stage4"), c3, c4, widths.depth)?,
        ];
        Ok(Self { stem, stages })
    }

    pub fn forward_features(&self, xs: &Tensor) -> Result<Features> {
        let xs = self.stem.forward(xs)?;
        let skip1 = self.stages[0].forward(&xs)?;
        let skip2 = self.stages[1].forward(&skip1)?;
        let out = self.stages[2].forward(&skip2)?;
        let out = self.stages[3].forward(&out)?;
        Ok(Features { skip1, skip2, out })
    }
}
