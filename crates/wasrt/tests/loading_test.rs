use {
    candle_core::{DType, Device, Tensor},
    candle_nn::{VarBuilder, VarMap},
    std::{collections::HashMap, path::PathBuf},
    wasrt::{Backbone, InferError, Inference, Mode, WasrConfig, WasrT, weights::COMPILED_PREFIX},
};

fn config() -> WasrConfig {
    WasrConfig {
        backbone: Backbone::MobileNetV3,
        ..WasrConfig::default()
    }
    .with_image_size(64, 64)
}

fn temp_path(name: &str, ext: &str) -> PathBuf {
    std::env::temp_dir().join(format!("wasrt-it-{}-{name}.{ext}", std::process::id()))
}

fn trained(config: WasrConfig) -> (VarMap, WasrT) {
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    let model = WasrT::load(vb, config).unwrap();
    (varmap, model)
}

fn sample() -> (Tensor, Tensor) {
    let image = Tensor::randn(0f32, 1.0, (1, 3, 64, 64), &Device::Cpu).unwrap();
    let hist = Tensor::randn(0f32, 1.0, (1, 4, 3, 64, 64), &Device::Cpu).unwrap();
    (image, hist)
}

fn max_diff(a: &Tensor, b: &Tensor) -> f32 {
    (a - b)
        .unwrap()
        .abs()
        .unwrap()
        .flatten_all()
        .unwrap()
        .max(0)
        .unwrap()
        .to_scalar::<f32>()
        .unwrap()
}

#[test]
fn test_use_wasrt_reproduces_saved_model() {
    let (varmap, reference) = trained(config());
    let path = temp_path("plain", "safetensors");
    varmap.save(&path).unwrap();

    let inference = Inference::cpu().unwrap();
    let loaded = inference.use_wasrt(&path, config()).unwrap();

    let (image, hist) = sample();
    let expected = reference.forward_unrolled(&image, &hist).unwrap().out;
    let actual = loaded.forward_unrolled(&image, &hist).unwrap().out;
    assert!(max_diff(&expected, &actual) < 1e-5);
    std::fs::remove_file(path).ok();
}

#[test]
fn test_use_wasrt_strips_compiled_prefix() {
    let (varmap, reference) = trained(config());
    let tensors: HashMap<String, Tensor> = varmap
        .data()
        .lock()
        .unwrap()
        .iter()
        .map(|(name, var)| (format!("{COMPILED_PREFIX}{name}"), var.as_tensor().clone()))
        .collect();
    let path = temp_path("compiled", "safetensors");
    candle_core::safetensors::save(&tensors, &path).unwrap();

    let loaded = Inference::cpu().unwrap().use_wasrt(&path, config()).unwrap();

    let (image, hist) = sample();
    let expected = reference.forward_unrolled(&image, &hist).unwrap().out;
    let actual = loaded.forward_unrolled(&image, &hist).unwrap().out;
    assert!(max_diff(&expected, &actual) < 1e-5);
    std::fs::remove_file(path).ok();
}

#[test]
fn test_use_wasrt_rejects_backbone_mismatch() {
    let (varmap, _) = trained(config());
    let path = temp_path("mismatch", "safetensors");
    varmap.save(&path).unwrap();

    let wrong = WasrConfig::default().with_image_size(64, 64);
    let result = Inference::cpu().unwrap().use_wasrt(&path, wrong);
    assert!(matches!(result, Err(InferError::Config(_))));
    std::fs::remove_file(path).ok();
}

#[test]
fn test_use_wasrt_missing_file() {
    let result = Inference::cpu()
        .unwrap()
        .use_wasrt("no/such/weights.safetensors", config());
    assert!(matches!(result, Err(InferError::Io(_))));
}

#[tokio::test]
async fn test_use_segmenter_loads_saved_weights() {
    use futures_util::{SinkExt, StreamExt};

    let (varmap, _) = trained(config());
    let path = temp_path("segmenter", "safetensors");
    varmap.save(&path).unwrap();

    let mut segmenter = Inference::cpu().unwrap().use_segmenter(&path, config()).unwrap();
    let frame = image::Image::new(96, 72, vec![128; 96 * 72 * 3], image::PixelFormat::Rgb8);
    segmenter.send(frame).await.unwrap();
    segmenter.close().await.unwrap();

    let mask = segmenter.next().await.unwrap().unwrap();
    assert_eq!((mask.width(), mask.height()), (96, 72));
    assert!(segmenter.next().await.is_none());
    std::fs::remove_file(path).ok();
}

#[test]
fn test_config_from_json_file() {
    let path = temp_path("config", "json");
    std::fs::write(
        &path,
        r#"{"backbone": "mobilenet_v3", "image_size": [64, 96], "mode": "sequential"}"#,
    )
    .unwrap();

    let config = WasrConfig::from_json_file(&path).unwrap();
    assert_eq!(config.backbone, Backbone::MobileNetV3);
    assert_eq!(config.image_size, (64, 96));
    assert_eq!(config.mode, Mode::Sequential);
    assert_eq!(config.context_length, 5);
    assert_eq!(config.num_classes, 3);
    std::fs::remove_file(path).ok();
}

#[test]
fn test_config_from_json_file_rejects_bad_values() {
    let path = temp_path("bad-config", "json");
    std::fs::write(&path, r#"{"context_length": 0}"#).unwrap();
    assert!(matches!(
        WasrConfig::from_json_file(&path),
        Err(InferError::Config(_))
    ));
    std::fs::remove_file(path).ok();
}

#[test]
fn test_shape_errors() {
    let (_, model) = trained(config());
    let device = Device::Cpu;
    let image = Tensor::zeros((2, 3, 64, 64), DType::F32, &device).unwrap();

    let short_hist = Tensor::zeros((2, 3, 3, 64, 64), DType::F32, &device).unwrap();
    assert!(matches!(
        model.forward_unrolled(&image, &short_hist),
        Err(InferError::Shape(_))
    ));

    let batch_mismatch = Tensor::zeros((1, 4, 3, 64, 64), DType::F32, &device).unwrap();
    assert!(matches!(
        model.forward_unrolled(&image, &batch_mismatch),
        Err(InferError::Shape(_))
    ));

    let gray = Tensor::zeros((2, 1, 64, 64), DType::F32, &device).unwrap();
    let hist = Tensor::zeros((2, 4, 3, 64, 64), DType::F32, &device).unwrap();
    assert!(matches!(
        model.forward_unrolled(&gray, &hist),
        Err(InferError::Shape(_))
    ));

    let small = Tensor::zeros((2, 3, 32, 32), DType::F32, &device).unwrap();
    let small_hist = Tensor::zeros((2, 4, 3, 32, 32), DType::F32, &device).unwrap();
    assert!(matches!(
        model.forward_unrolled(&small, &small_hist),
        Err(InferError::Shape(_))
    ));

    let mut model = model.to_sequential();
    assert!(matches!(
        model.forward_sequential(&image),
        Err(InferError::Shape(_))
    ));
    assert!(!model.is_context_seeded());
}

#[test]
fn test_mode_errors() {
    let (_, mut model) = trained(config());
    let frame = Tensor::zeros((1, 3, 64, 64), DType::F32, &Device::Cpu).unwrap();
    let hist = Tensor::zeros((1, 4, 3, 64, 64), DType::F32, &Device::Cpu).unwrap();

    assert!(matches!(model.reset_context(), Err(InferError::Mode(_))));
    assert!(matches!(
        model.forward_sequential(&frame),
        Err(InferError::Mode(_))
    ));

    model.set_mode(Mode::Sequential);
    assert!(matches!(
        model.forward_unrolled(&frame, &hist),
        Err(InferError::Mode(_))
    ));
    assert!(model.reset_context().is_ok());
}

#[test]
fn test_error_display() {
    let err = InferError::Mode("forward_unrolled called in sequential mode".to_string());
    assert_eq!(
        err.to_string(),
        "mode error: forward_unrolled called in sequential mode"
    );
}
