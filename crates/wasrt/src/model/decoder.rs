use {
    super::{
        blocks::{ConvBlock, pointwise, resize_to},
        encoder::Features,
    },
    crate::config::Widths,
    candle_core::{Result, Tensor},
    candle_nn::{Conv2d, Module, VarBuilder},
};

/// Segmentation decoder.
///
/// Fuses the target's deepest features with the temporal context, then
/// refines upward through the stride-8 and stride-4 skips before a per-pixel
/// classifier. Logits are returned at the input resolution.
#[derive(Debug)]
pub struct Decoder {
    context: ConvBlock,
    refine2: ConvBlock,
    refine1: ConvBlock,
    classifier: Conv2d,
}

impl Decoder {
    pub fn load(vb: VarBuilder, widths: &Widths, num_classes: usize) -> Result<Self> {
        let [c1, c2, _, c4] = widths.stages;
        let d = widths.decoder;
        let context = ConvBlock::same(vb.pp("context"), c4 + widths.context, d)?;
        let refine2 = ConvBlock::same(vb.pp("refine2"), d + c2, d)?;
        let refine1 = ConvBlock::same(vb.pp("refine1"), d + c1, d)?;
        let classifier = pointwise(vb.pp("classifier"), d, num_classes)?;
        Ok(Self {
            context,
            refine2,
            refine1,
            classifier,
        })
    }

    /// `context` is the fused temporal map at the scale of `features.out`.
    pub fn forward(
        &self,
        features: &Features,
        context: &Tensor,
        output_hw: (usize, usize),
    ) -> Result<Tensor> {
        let xs = Tensor::cat(&[&features.out, context], 1)?.apply(&self.context)?;

        let (_, _, h2, w2) = features.skip2.dims4()?;
        let xs = Tensor::cat(&[&resize_to(&xs, h2, w2)?, &features.skip2], 1)?;
        let xs = self.refine2.forward(&xs)?;

        let (_, _, h1, w1) = features.skip1.dims4()?;
        let xs = Tensor::cat(&[&resize_to(&xs, h1, w1)?, &features.skip1], 1)?;
        let xs = self.refine1.forward(&xs)?;

        let logits = self.classifier.forward(&xs)?;
        resize_to(&logits, output_hw.0, output_hw.1)
    }
}
