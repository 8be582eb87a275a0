use {
    crate::{
        InferError, WasrT,
        model::{
            Prediction,
            blocks::{resize_bilinear_to, resize_to},
        },
    },
    candle_core::{DType, Tensor as CanTensor},
    futures_core::Stream,
    futures_sink::Sink,
    image::{Image, Normalization, Palette},
    std::{
        collections::VecDeque,
        fmt,
        future::Future,
        pin::Pin,
        sync::{Arc, Mutex},
        task::{Context, Poll, Waker},
    },
};

/// Per-pixel class indices of one frame, at the frame's own resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationMask {
    /// `[height, width]`
    pub classes: base::Tensor<u8>,
}

impl SegmentationMask {
    pub fn height(&self) -> usize {
        self.classes.shape[0]
    }

    pub fn width(&self) -> usize {
        self.classes.shape[1]
    }

    pub fn class_at(&self, x: usize, y: usize) -> Option<u8> {
        if x >= self.width() || y >= self.height() {
            return None;
        }
        self.classes.data.get(y * self.width() + x).copied()
    }

    pub fn colorize(&self, palette: &Palette) -> Result<Image, InferError> {
        Ok(palette.colorize(&self.classes)?)
    }
}

enum Command {
    Frame(Image),
    Reset,
}

type Step = Pin<Box<dyn Future<Output = Result<Option<SegmentationMask>, InferError>> + Send>>;

/// Streaming segmenter for video sequences.
///
/// Implements `Sink<Image>` to accept frames and
/// `Stream<Item = Result<SegmentationMask>>` to produce masks, one per frame,
/// in send order. Frames are processed one at a time because each one
/// advances the model's temporal context.
///
/// Frames of any size are accepted; they are resized (nearest) to the model
/// resolution and the class scores are resized back (bilinear) before the
/// argmax.
pub struct Segmenter {
    model: Arc<Mutex<WasrT>>,
    normalization: Normalization,
    pending: VecDeque<Command>,
    closed: bool,
    inflight: Option<Step>,
    stream_waker: Option<Waker>,
}

impl fmt::Debug for Segmenter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segmenter")
            .field("pending", &self.pending.len())
            .field("closed", &self.closed)
            .field("inflight", &self.inflight.is_some())
            .finish()
    }
}

impl Segmenter {
    /// Wraps `model`, switching it to sequential mode.
    pub fn new(model: WasrT) -> Self {
        Self {
            model: Arc::new(Mutex::new(model.to_sequential())),
            normalization: Normalization::imagenet(),
            pending: VecDeque::new(),
            closed: false,
            inflight: None,
            stream_waker: None,
        }
    }

    /// Marks a sequence boundary.
    ///
    /// Queued behind the frames already sent, so those still see the old
    /// context and the next frame sent seeds a fresh one.
    pub fn reset(&mut self) {
        self.enqueue(Command::Reset);
    }

    fn enqueue(&mut self, command: Command) {
        self.pending.push_back(command);
        if let Some(waker) = self.stream_waker.take() {
            waker.wake();
        }
    }

    fn start(&mut self, command: Command) {
        let model = Arc::clone(&self.model);
        let normalization = self.normalization;

        self.inflight = Some(Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                let mut model = model
                    .lock()
                    .map_err(|_| InferError::Runtime("segmenter model lock poisoned".to_string()))?;
                match command {
                    Command::Frame(image) => {
                        segment_frame(&mut model, &normalization, &image).map(Some)
                    }
                    Command::Reset => model.reset_context().map(|()| None),
                }
            })
            .await
            .map_err(|e| InferError::Runtime(format!("segmentation task failed: {e}")))?
        }));
    }
}

/// Runs one frame through a sequential model.
fn segment_frame(
    model: &mut WasrT,
    normalization: &Normalization,
    image: &Image,
) -> Result<SegmentationMask, InferError> {
    if image.width == 0 || image.height == 0 {
        return Err(InferError::Shape(format!(
            "frame dimensions must be non-zero, got {}x{}",
            image.width, image.height
        )));
    }

    let chw = normalization.apply(image)?;
    let (h, w) = (image.height, image.width);
    let (model_h, model_w) = model.config().image_size;

    let frame = CanTensor::from_vec(chw.data, (3, h, w), model.device())?.unsqueeze(0)?;
    let frame = resize_to(&frame, model_h, model_w)?;

    let prediction = model.forward_sequential(&frame)?;
    let out = resize_bilinear_to(&prediction.out.to_dtype(DType::F32)?, h, w)?;
    let classes = Prediction { out }.to_mask(0)?;

    Ok(SegmentationMask { classes })
}

impl Sink<Image> for Segmenter {
    type Error = InferError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), InferError>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: Image) -> Result<(), InferError> {
        self.get_mut().enqueue(Command::Frame(item));
        Ok(())
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), InferError>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), InferError>> {
        let this = self.get_mut();
        this.closed = true;
        if let Some(waker) = this.stream_waker.take() {
            waker.wake();
        }
        Poll::Ready(Ok(()))
    }
}

impl Stream for Segmenter {
    type Item = Result<SegmentationMask, InferError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if this.inflight.is_none() {
                match this.pending.pop_front() {
                    Some(command) => this.start(command),
                    None => break,
                }
            }

            if let Some(fut) = this.inflight.as_mut() {
                match fut.as_mut().poll(cx) {
                    // Resets produce no mask; move on to the next command.
                    Poll::Ready(Ok(None)) => this.inflight = None,
                    Poll::Ready(Ok(Some(mask))) => {
                        this.inflight = None;
                        return Poll::Ready(Some(Ok(mask)));
                    }
                    Poll::Ready(Err(e)) => {
                        this.inflight = None;
                        return Poll::Ready(Some(Err(e)));
                    }
                    Poll::Pending => return Poll::Pending,
                }
            }
        }

        if this.closed {
            return Poll::Ready(None);
        }

        this.stream_waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

fn _assert_send() {
    fn assert<T: Send>() {}
    assert::<Segmenter>();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{WasrConfig, config::Backbone};
    use candle_core::{DType, Device};
    use candle_nn::{VarBuilder, VarMap};
    use image::PixelFormat;

    fn test_model() -> WasrT {
        test_model_from(&VarMap::new())
    }

    fn test_model_from(varmap: &VarMap) -> WasrT {
        let vb = VarBuilder::from_varmap(varmap, DType::F32, &Device::Cpu);
        let config = WasrConfig {
            backbone: Backbone::MobileNetV3,
            ..WasrConfig::default()
        }
        .with_image_size(64, 64);
        WasrT::load(vb, config).unwrap()
    }

    fn frame(width: usize, height: usize, value: u8) -> Image {
        Image::new(width, height, vec![value; width * height * 3], PixelFormat::Bgr8)
    }

    fn textured(seed: usize) -> Image {
        let data = (0..64 * 64 * 3)
            .map(|i| ((i * 7 + seed * 31 + (i / 192) * 13) % 256) as u8)
            .collect();
        Image::new(64, 64, data, PixelFormat::Bgr8)
    }

    #[test]
    fn test_segment_frame_keeps_frame_resolution() {
        let mut model = test_model().to_sequential();
        let mask = segment_frame(&mut model, &Normalization::imagenet(), &frame(80, 48, 90)).unwrap();
        assert_eq!(mask.width(), 80);
        assert_eq!(mask.height(), 48);
        assert!(mask.classes.data.iter().all(|&c| c < 3));
        assert!(model.is_context_seeded());
    }

    #[test]
    fn test_segment_frame_rejects_empty_frame() {
        let mut model = test_model().to_sequential();
        let result = segment_frame(&mut model, &Normalization::imagenet(), &frame(0, 0, 0));
        assert!(matches!(result, Err(InferError::Shape(_))));
    }

    #[test]
    fn test_mask_class_at() {
        let mask = SegmentationMask {
            classes: base::Tensor::new(vec![2, 3], vec![0, 1, 2, 2, 1, 0]).unwrap(),
        };
        assert_eq!(mask.class_at(2, 0), Some(2));
        assert_eq!(mask.class_at(0, 1), Some(2));
        assert_eq!(mask.class_at(3, 0), None);
    }

    #[test]
    fn test_new_switches_to_sequential() {
        let segmenter = Segmenter::new(test_model());
        assert_eq!(segmenter.model.lock().unwrap().mode(), crate::Mode::Sequential);
    }

    #[tokio::test]
    async fn test_reset_is_ordered_with_frames() {
        use futures_util::{SinkExt, StreamExt};

        let varmap = VarMap::new();

        let mut fresh = Segmenter::new(test_model_from(&varmap));
        fresh.send(textured(100)).await.unwrap();
        fresh.close().await.unwrap();
        let expected = fresh.next().await.unwrap().unwrap();

        // Reset is queued behind sequence A without draining its masks first.
        let mut segmenter = Segmenter::new(test_model_from(&varmap));
        for seed in 0..3 {
            segmenter.send(textured(seed)).await.unwrap();
        }
        segmenter.reset();
        segmenter.send(textured(100)).await.unwrap();
        segmenter.close().await.unwrap();

        let masks: Vec<SegmentationMask> = segmenter
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .map(|result| result.unwrap())
            .collect();
        assert_eq!(masks.len(), 4);
        assert_eq!(masks[3], expected);
    }

    #[tokio::test]
    async fn test_segment_stream_one_mask_per_frame() {
        use futures_util::{SinkExt, StreamExt};

        let mut segmenter = Segmenter::new(test_model());
        for value in [10u8, 120, 250] {
            segmenter.send(frame(64, 64, value)).await.unwrap();
        }
        segmenter.close().await.unwrap();

        let mut count = 0;
        while let Some(result) = segmenter.next().await {
            let mask = result.unwrap();
            assert_eq!((mask.width(), mask.height()), (64, 64));
            count += 1;
        }
        assert_eq!(count, 3);
    }
}
