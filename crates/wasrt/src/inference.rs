use {
    crate::{
        WasrConfig, WasrT,
        error::{InferError, Result},
        segmenter::Segmenter,
        weights::{self, COMPILED_PREFIX},
    },
    candle_core::Device,
    std::path::Path,
};

#[derive(Debug)]
pub struct Inference {
    device: Device,
}

impl Inference {
    pub fn cpu() -> Result<Self> {
        base::log_info!("Inference device: CPU");
        Ok(Self {
            device: Device::Cpu,
        })
    }

    #[cfg(feature = "cuda")]
    pub fn cuda(ordinal: usize) -> Result<Self> {
        let device = Device::new_cuda(ordinal)?;
        if device.is_cuda() {
            base::log_info!("Inference device: CUDA (ordinal {})", ordinal);
        } else {
            base::log_warn!(
                "Inference device: requested CUDA ordinal {} but device reports non-CUDA",
                ordinal
            );
        }
        Ok(Self { device })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Loads WaSR-T weights from a safetensors file.
    ///
    /// The backbone recorded in the file must match `config.backbone`.
    /// Checkpoints exported from a compiled training run are remapped
    /// transparently.
    pub fn use_wasrt(&self, weights_path: impl AsRef<Path>, config: WasrConfig) -> Result<WasrT> {
        config.validate()?;
        let path = weights_path.as_ref();
        let info = weights::inspect(path)?;
        if info.backbone != config.backbone {
            return Err(InferError::Config(format!(
                "weights are for backbone {}, configuration asks for {}",
                info.backbone, config.backbone
            )));
        }

        let vb = unsafe {
            candle_nn::VarBuilder::from_mmaped_safetensors(&[path], config.dtype(), &self.device)?
        };
        let vb = if info.compiled {
            base::log_info!("remapping compiled checkpoint names ({COMPILED_PREFIX})");
            vb.rename_f(|name: &str| format!("{COMPILED_PREFIX}{name}"))
        } else {
            vb
        };

        base::log_info!(
            "loading WaSR-T from {} ({} tensors, backbone {}, T={}, {} mode)",
            path.display(),
            info.tensor_count,
            config.backbone,
            config.context_length,
            config.mode
        );
        WasrT::load(vb, config)
    }

    /// Loads the model and wraps it for frame-by-frame streaming.
    pub fn use_segmenter(
        &self,
        weights_path: impl AsRef<Path>,
        config: WasrConfig,
    ) -> Result<Segmenter> {
        Ok(Segmenter::new(self.use_wasrt(weights_path, config)?))
    }
}
