use image::{DynamicImage, GenericImageView, RgbImage};
use ndarray::Array4;
use ort::{session::Session, value::Value};

use crate::error::VisionError;
use crate::yunet;

/// Side length of the square detector input canvas.
const DETECTOR_INPUT: u32 = 640;

/// Reference eye positions for a 112x112 encoder crop (ArcFace layout).
const REF_LEFT_EYE: (f32, f32) = (38.3, 51.7);
const REF_RIGHT_EYE: (f32, f32) = (73.5, 51.5);

/// A detected face in source-image pixel coordinates.
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub landmarks: [f32; 10], // left eye, right eye, nose, mouth corners
}

/// Fixed-length face embedding produced by the encoder model.
#[derive(Debug, Clone)]
pub struct Embedding {
    pub vector: Vec<f32>,
}

impl Embedding {
    pub fn dim(&self) -> usize {
        self.vector.len()
    }
}

/// Letterbox `img` onto a square canvas, keeping aspect ratio. Returns the
/// canvas plus the scale and offsets needed to map detections back.
fn letterbox(img: &DynamicImage, target: u32) -> (RgbImage, f32, u32, u32) {
    let (w, h) = img.dimensions();
    let scale = target as f32 / w.max(h) as f32;
    let new_w = (w as f32 * scale) as u32;
    let new_h = (h as f32 * scale) as u32;

    let resized = img.resize_exact(new_w, new_h, image::imageops::FilterType::Triangle);
    let mut canvas = DynamicImage::new_rgb8(target, target);
    let dx = (target - new_w) / 2;
    let dy = (target - new_h) / 2;
    image::imageops::overlay(&mut canvas, &resized, dx as i64, dy as i64);

    (canvas.to_rgb8(), scale, dx, dy)
}

/// Split an interleaved RGB image into planar channels in BGR order, values
/// kept in the raw [0, 255] range.
fn bgr_planes(img: &RgbImage) -> Vec<f32> {
    let count = (img.width() * img.height()) as usize;
    let mut planes = vec![0f32; 3 * count];
    let (b, rest) = planes.split_at_mut(count);
    let (g, r) = rest.split_at_mut(count);

    let pixels = img.as_raw();
    for i in 0..count {
        r[i] = pixels[i * 3] as f32;
        g[i] = pixels[i * 3 + 1] as f32;
        b[i] = pixels[i * 3 + 2] as f32;
    }
    planes
}

/// Map raw [0, 255] pixel values onto the symmetric [-1, 1] range the
/// encoder expects: (raw - 127.5) / 127.5.
fn normalize_pixels(values: &mut [f32]) {
    for v in values {
        *v = (*v - 127.5) / 127.5;
    }
}

/// Detect faces in an image. Detector input is [1, 3, H, W] BGR with raw
/// [0, 255] values; outputs decode through `yunet`.
pub fn detect_faces(
    session: &mut Session,
    img: &DynamicImage,
    score_threshold: f32,
    nms_threshold: f32,
) -> Result<Vec<Detection>, VisionError> {
    let size = DETECTOR_INPUT;
    let (canvas, scale, dx, dy) = letterbox(img, size);

    let input = Array4::from_shape_vec(
        (1, 3, size as usize, size as usize),
        bgr_planes(&canvas),
    )?;
    let input_tensor = Value::from_array(input)?;
    let outputs = session.run(ort::inputs![input_tensor])?;

    let mut raw: Vec<(Vec<i64>, Vec<f32>)> = Vec::new();
    for (_name, output) in outputs.iter() {
        let (shape, data) = output.try_extract_tensor::<f32>()?;
        raw.push((shape.iter().copied().collect(), data.to_vec()));
    }
    let refs: Vec<(&[i64], &[f32])> = raw
        .iter()
        .map(|(s, d)| (s.as_slice(), d.as_slice()))
        .collect();

    let decoded = yunet::decode_outputs(&refs, score_threshold, size as usize)?;

    // Undo the letterbox: normalized canvas coordinates back to source pixels.
    let to_src_x = |v: f32| (v * size as f32 - dx as f32) / scale;
    let to_src_y = |v: f32| (v * size as f32 - dy as f32) / scale;
    let mut detections: Vec<Detection> = decoded
        .into_iter()
        .map(|d| {
            let mut landmarks = [0f32; 10];
            for k in 0..5 {
                landmarks[k * 2] = to_src_x(d.landmarks[k * 2]);
                landmarks[k * 2 + 1] = to_src_y(d.landmarks[k * 2 + 1]);
            }
            Detection {
                bbox: [
                    to_src_x(d.bbox[0]),
                    to_src_y(d.bbox[1]),
                    d.bbox[2] * size as f32 / scale,
                    d.bbox[3] * size as f32 / scale,
                ],
                score: d.score,
                landmarks,
            }
        })
        .collect();

    if nms_threshold < 1.0 {
        detections = nms(&detections, nms_threshold);
    }

    Ok(detections)
}

/// Non-maximum suppression over overlapping detections.
pub fn nms(detections: &[Detection], iou_threshold: f32) -> Vec<Detection> {
    if detections.is_empty() {
        return vec![];
    }

    let mut sorted = detections.to_vec();
    sorted.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep = Vec::new();
    let mut suppressed = vec![false; sorted.len()];

    for i in 0..sorted.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(sorted[i].clone());
        for j in (i + 1)..sorted.len() {
            if !suppressed[j] && compute_iou(&sorted[i].bbox, &sorted[j].bbox) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

fn compute_iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = (a[0] + a[2]).min(b[0] + b[2]);
    let y2 = (a[1] + a[3]).min(b[1] + b[3]);

    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }

    let inter = (x2 - x1) * (y2 - y1);
    inter / (a[2] * a[3] + b[2] * b[3] - inter)
}

/// Rotate, scale and crop the face so the eyes land on the reference
/// positions the encoder was trained with.
pub fn align_face(
    img: &DynamicImage,
    detection: &Detection,
    size: u32,
) -> Result<DynamicImage, VisionError> {
    let left = (detection.landmarks[0], detection.landmarks[1]);
    let right = (detection.landmarks[2], detection.landmarks[3]);

    let eye_dx = right.0 - left.0;
    let eye_dy = right.1 - left.1;
    let angle = eye_dy.atan2(eye_dx);
    let eye_dist = (eye_dx * eye_dx + eye_dy * eye_dy).sqrt();
    if eye_dist <= f32::EPSILON {
        return Err(VisionError::Inference(
            "degenerate eye landmarks in detection".into(),
        ));
    }

    let ref_dist = ((REF_RIGHT_EYE.0 - REF_LEFT_EYE.0).powi(2)
        + (REF_RIGHT_EYE.1 - REF_LEFT_EYE.1).powi(2))
    .sqrt();
    let scale = (size as f32 / 112.0) * (ref_dist / eye_dist);

    let center = ((left.0 + right.0) / 2.0, (left.1 + right.1) / 2.0);
    let ref_center = (
        (REF_LEFT_EYE.0 + REF_RIGHT_EYE.0) / 2.0 * size as f32 / 112.0,
        (REF_LEFT_EYE.1 + REF_RIGHT_EYE.1) / 2.0 * size as f32 / 112.0,
    );

    // Forward similarity transform: output = [a b; c d] * input + [tx, ty].
    let a = scale * angle.cos();
    let b = scale * angle.sin();
    let c = -scale * angle.sin();
    let d = scale * angle.cos();
    let tx = ref_center.0 - (a * center.0 + b * center.1);
    let ty = ref_center.1 - (c * center.0 + d * center.1);

    // Inverse of the 2x2 part, hoisted out of the pixel loop.
    let det = a * d - b * c;
    let (ia, ib) = (d / det, -b / det);
    let (ic, id) = (-c / det, a / det);

    let (img_w, img_h) = img.dimensions();
    let mut output = RgbImage::new(size, size);

    for out_y in 0..size {
        for out_x in 0..size {
            let ox = out_x as f32 - tx;
            let oy = out_y as f32 - ty;
            let in_x = ia * ox + ib * oy;
            let in_y = ic * ox + id * oy;

            // Outside the source image the crop stays black.
            if in_x < 0.0 || in_x >= img_w as f32 || in_y < 0.0 || in_y >= img_h as f32 {
                continue;
            }

            let x0 = in_x.floor() as u32;
            let y0 = in_y.floor() as u32;
            let x1 = (x0 + 1).min(img_w - 1);
            let y1 = (y0 + 1).min(img_h - 1);
            let fx = in_x - x0 as f32;
            let fy = in_y - y0 as f32;

            let p00 = img.get_pixel(x0, y0);
            let p10 = img.get_pixel(x1, y0);
            let p01 = img.get_pixel(x0, y1);
            let p11 = img.get_pixel(x1, y1);

            let w00 = (1.0 - fx) * (1.0 - fy);
            let w10 = fx * (1.0 - fy);
            let w01 = (1.0 - fx) * fy;
            let w11 = fx * fy;

            let mut rgb = [0u8; 3];
            for ch in 0..3 {
                rgb[ch] = (p00[ch] as f32 * w00
                    + p10[ch] as f32 * w10
                    + p01[ch] as f32 * w01
                    + p11[ch] as f32 * w11) as u8;
            }
            output.put_pixel(out_x, out_y, image::Rgb(rgb));
        }
    }

    Ok(DynamicImage::ImageRgb8(output))
}

/// Encode an aligned face crop into an embedding.
///
/// The crop is resized to the encoder's square input; pixel values are
/// normalized to [-1, 1] before inference. The output length must equal
/// `expected_dim`.
pub fn encode_face(
    session: &mut Session,
    face: &DynamicImage,
    input_size: u32,
    expected_dim: usize,
) -> Result<Embedding, VisionError> {
    let rgb = face
        .resize_exact(input_size, input_size, image::imageops::FilterType::Triangle)
        .to_rgb8();
    let mut planes = bgr_planes(&rgb);
    normalize_pixels(&mut planes);

    let input = Array4::from_shape_vec(
        (1, 3, input_size as usize, input_size as usize),
        planes,
    )?;
    let input_tensor = Value::from_array(input)?;
    let outputs = session.run(ort::inputs![input_tensor])?;
    let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;

    // Expecting shape [1, D].
    let dim = if shape.len() == 2 {
        shape[1] as usize
    } else {
        data.len()
    };
    if dim != expected_dim {
        return Err(VisionError::EmbeddingDimension {
            expected: expected_dim,
            got: dim,
        });
    }

    Ok(Embedding {
        vector: data[..dim].to_vec(),
    })
}
