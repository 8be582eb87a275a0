use {
    crate::{
        config::Backbone,
        error::{InferError, Result},
    },
    std::path::Path,
};

/// Prefix `torch.compile` adds to every parameter name.
pub const COMPILED_PREFIX: &str = "_orig_mod.";

const STEM_KEY: &str = "encoder.stem.conv.weight";

/// What a weights file reveals before it is loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightsInfo {
    pub backbone: Backbone,
    /// Names carry `COMPILED_PREFIX` and must be remapped on load.
    pub compiled: bool,
    pub tensor_count: usize,
}

/// Reads tensor metadata from a safetensors file.
///
/// Memory-maps the file without copying tensor data; the later mmap by the
/// var builder shares the same pages.
pub fn inspect(path: &Path) -> Result<WeightsInfo> {
    use safetensors::SafeTensors;

    let file = std::fs::File::open(path)?;
    let mmap = unsafe { memmap2::Mmap::map(&file) }
        .map_err(|e| InferError::Io(format!("failed to memory-map safetensors file: {e}")))?;
    let tensors = SafeTensors::deserialize(&mmap)
        .map_err(|e| InferError::Io(format!("failed to deserialize safetensors: {e}")))?;

    let names = tensors.names();
    let compiled = !names.is_empty() && names.iter().all(|n| n.starts_with(COMPILED_PREFIX));
    let key = if compiled {
        format!("{COMPILED_PREFIX}{STEM_KEY}")
    } else {
        STEM_KEY.to_string()
    };

    let view = tensors
        .tensor(&key)
        .map_err(|e| InferError::Config(format!("key '{key}' not found in weights: {e}")))?;
    let stem_width = view.shape().first().copied().ok_or_else(|| {
        InferError::Config(format!("unexpected shape for {key}: {:?}", view.shape()))
    })?;
    let backbone = Backbone::from_stem_width(stem_width).ok_or_else(|| {
        InferError::Config(format!(
            "unknown backbone: stem convolution has {stem_width} output channels"
        ))
    })?;

    Ok(WeightsInfo {
        backbone,
        compiled,
        tensor_count: names.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device, Tensor};
    use std::collections::HashMap;

    fn write_weights(name: &str, tensors: HashMap<String, Tensor>) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("wasrt-{}-{name}.safetensors", std::process::id()));
        candle_core::safetensors::save(&tensors, &path).unwrap();
        path
    }

    #[test]
    fn test_inspect_plain_mobile() {
        let stem = Tensor::zeros((16, 3, 3, 3), DType::F32, &Device::Cpu).unwrap();
        let path = write_weights("plain", HashMap::from([(STEM_KEY.to_string(), stem)]));
        let info = inspect(&path).unwrap();
        assert_eq!(info.backbone, Backbone::MobileNetV3);
        assert!(!info.compiled);
        assert_eq!(info.tensor_count, 1);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_inspect_compiled_prefix() {
        let stem = Tensor::zeros((64, 3, 3, 3), DType::F32, &Device::Cpu).unwrap();
        let key = format!("{COMPILED_PREFIX}{STEM_KEY}");
        let path = write_weights("compiled", HashMap::from([(key, stem)]));
        let info = inspect(&path).unwrap();
        assert_eq!(info.backbone, Backbone::ResNet101);
        assert!(info.compiled);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_inspect_unknown_width() {
        let stem = Tensor::zeros((48, 3, 3, 3), DType::F32, &Device::Cpu).unwrap();
        let path = write_weights("unknown", HashMap::from([(STEM_KEY.to_string(), stem)]));
        assert!(matches!(inspect(&path), Err(InferError::Config(_))));
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_inspect_missing_file() {
        let result = inspect(Path::new("definitely_missing.safetensors"));
        assert!(matches!(result, Err(InferError::Io(_))));
    }
}
