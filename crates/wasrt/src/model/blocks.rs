// Encoder/decoder building blocks
// ConvBlock ported from HuggingFace candle-wasm-examples/yolo
// Source: https://github.com/huggingface/candle/tree/main/candle-wasm-examples/yolo
// License: Apache-2.0 OR MIT

use candle_core::{Result, Tensor};
use candle_nn::{Conv2dConfig, Module, VarBuilder, batch_norm, conv2d, conv2d_no_bias};

/// Convolution block: Conv2d + BatchNorm + ReLU
#[derive(Debug)]
pub struct ConvBlock {
    conv: candle_nn::Conv2d,
    bn: candle_nn::BatchNorm,
}

impl ConvBlock {
    pub fn load(
        vb: VarBuilder,
        c1: usize,
        c2: usize,
        k: usize,
        stride: usize,
        padding: usize,
    ) -> Result<Self> {
        let conv = conv2d_no_bias(
            c1,
            c2,
            k,
            Conv2dConfig {
                stride,
                padding,
                ..Default::default()
            },
            vb.pp("conv"),
        )?;
        let bn = batch_norm(c2, 1e-5, vb.pp("bn"))?;
        Ok(Self { conv, bn })
    }

    /// 3x3, same padding.
    pub fn same(vb: VarBuilder, c1: usize, c2: usize) -> Result<Self> {
        Self::load(vb, c1, c2, 3, 1, 1)
    }

    /// 3x3, halves the spatial resolution.
    pub fn down(vb: VarBuilder, c1: usize, c2: usize) -> Result<Self> {
        Self::load(vb, c1, c2, 3, 2, 1)
    }
}

impl Module for ConvBlock {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        // Inference statistics only; batch composition never changes a sample's output.
        xs.apply(&self.conv)?.apply_t(&self.bn, false)?.relu()
    }
}

/// Two 3x3 convolutions with an identity shortcut.
#[derive(Debug)]
pub struct ResidualBlock {
    cv1: ConvBlock,
    cv2: ConvBlock,
}

impl ResidualBlock {
    pub fn load(vb: VarBuilder, c: usize) -> Result<Self> {
        let cv1 = ConvBlock::same(vb.pp("cv1"), c, c)?;
        let cv2 = ConvBlock::same(vb.pp("cv2"), c, c)?;
        Ok(Self { cv1, cv2 })
    }
}

impl Module for ResidualBlock {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let out = xs.apply(&self.cv1)?.apply(&self.cv2)?;
        (out + xs)?.relu()
    }
}

/// Encoder stage: strided downsample followed by residual refinement.
#[derive(Debug)]
pub struct Stage {
    down: ConvBlock,
    blocks: Vec<ResidualBlock>,
}

impl Stage {
    pub fn load(vb: VarBuilder, c1: usize, c2: usize, depth: usize) -> Result<Self> {
        let down = ConvBlock::down(vb.pp("down"), c1, c2)?;
        let mut blocks = Vec::with_capacity(depth);
        for i in 0..depth {
            blocks.push(ResidualBlock::load(vb.pp(format!("block.{i}")), c2)?);
        }
        Ok(Self { down, blocks })
    }
}

impl Module for Stage {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let mut xs = xs.apply(&self.down)?;
        for block in &self.blocks {
            xs = xs.apply(block)?;
        }
        Ok(xs)
    }
}

/// 1x1 convolution with bias, used for per-pixel projections and classifiers.
pub fn pointwise(vb: VarBuilder, c1: usize, c2: usize) -> Result<candle_nn::Conv2d> {
    conv2d(c1, c2, 1, Conv2dConfig::default(), vb)
}

/// Nearest-neighbour resize to an explicit spatial size.
pub fn resize_to(xs: &Tensor, h: usize, w: usize) -> Result<Tensor> {
    let (_b, _c, xh, xw) = xs.dims4()?;
    if xh == h && xw == w {
        Ok(xs.clone())
    } else {
        xs.upsample_nearest2d(h, w)
    }
}

/// Bilinear resize (half-pixel centers) for class scores.
pub fn resize_bilinear_to(xs: &Tensor, h: usize, w: usize) -> Result<Tensor> {
    let (_b, _c, xh, xw) = xs.dims4()?;
    if xh == h && xw == w {
        Ok(xs.clone())
    } else {
        xs.upsample_bilinear2d(h, w, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device, Tensor};
    use candle_nn::{VarBuilder, VarMap};

    #[test]
    fn test_conv_block_output_shape() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let block = ConvBlock::same(vb.pp("conv"), 3, 16).unwrap();
        let input = Tensor::zeros(&[1, 3, 32, 32], DType::F32, &device).unwrap();
        let output = block.forward(&input).unwrap();
        assert_eq!(output.dims(), &[1, 16, 32, 32]);
    }

    #[test]
    fn test_conv_block_down_halves_spatial() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let block = ConvBlock::down(vb.pp("conv"), 3, 16).unwrap();
        let input = Tensor::zeros(&[2, 3, 32, 32], DType::F32, &device).unwrap();
        let output = block.forward(&input).unwrap();
        assert_eq!(output.dims(), &[2, 16, 16, 16]);
    }

    #[test]
    fn test_conv_block_output_is_non_negative() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let block = ConvBlock::same(vb, 3, 8).unwrap();
        let input = Tensor::randn(0f32, 1.0, (1, 3, 8, 8), &device).unwrap();
        let min = block
            .forward(&input)
            .unwrap()
            .flatten_all()
            .unwrap()
            .min(0)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        assert!(min >= 0.0);
    }

    #[test]
    fn test_residual_block_keeps_shape() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let block = ResidualBlock::load(vb, 16).unwrap();
        let input = Tensor::zeros(&[1, 16, 8, 8], DType::F32, &device).unwrap();
        assert_eq!(block.forward(&input).unwrap().dims(), &[1, 16, 8, 8]);
    }

    #[test]
    fn test_stage_downsamples_and_widens() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let stage = Stage::load(vb, 8, 24, 2).unwrap();
        let input = Tensor::zeros(&[1, 8, 16, 16], DType::F32, &device).unwrap();
        assert_eq!(stage.forward(&input).unwrap().dims(), &[1, 24, 8, 8]);
    }

    #[test]
    fn test_resize_to() {
        let device = Device::Cpu;
        let input = Tensor::zeros(&[1, 4, 2, 3], DType::F32, &device).unwrap();
        assert_eq!(resize_to(&input, 8, 12).unwrap().dims(), &[1, 4, 8, 12]);
        assert_eq!(resize_to(&input, 2, 3).unwrap().dims(), &[1, 4, 2, 3]);
    }

    #[test]
    fn test_resize_bilinear_interpolates() {
        let device = Device::Cpu;
        let input = Tensor::new(&[[[[0f32, 4.0]]]], &device).unwrap();
        let output = resize_bilinear_to(&input, 1, 4).unwrap();
        assert_eq!(output.dims(), &[1, 1, 1, 4]);
        let values = output.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(values, vec![0.0, 1.0, 3.0, 4.0]);
    }
}
