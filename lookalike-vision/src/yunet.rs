//! YuNet detector post-processing.
//!
//! The detector is anchor-free and predicts directly from grid locations at
//! strides 8, 16 and 32. Per stride it emits four tensors, grouped by kind
//! across the output list (cls ×3, obj ×3, bbox ×3, kps ×3):
//! - cls: [1, H*W, 1] classification scores
//! - obj: [1, H*W, 1] objectness scores
//! - bbox: [1, H*W, 4] box deltas (dx, dy, dw, dh)
//! - kps: [1, H*W, 10] landmark deltas (5 points × 2 coords)
//!
//! A grid cell decodes without anchors:
//!   cx = (grid_x + dx) * stride    w = dw * stride
//! and likewise for cy/h and each landmark point; coordinates are then
//! normalized by the input size.

use ndarray::Array2;

use crate::error::VisionError;

const STRIDES: [usize; 3] = [8, 16, 32];

/// Detection in normalized [0, 1] canvas coordinates.
#[derive(Debug, Clone)]
pub struct RawDetection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub landmarks: [f32; 10], // x1,y1 .. x5,y5
}

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Validate one raw output tensor and reshape it to [rows, cols].
fn plane(
    outputs: &[(&[i64], &[f32])],
    index: usize,
    rows: usize,
    cols: usize,
    what: &str,
) -> Result<Array2<f32>, VisionError> {
    let (shape, data) = outputs
        .get(index)
        .ok_or_else(|| VisionError::Inference(format!("missing {what} output at index {index}")))?;
    if shape.len() != 3 || shape[0] != 1 || shape[1] as usize != rows || shape[2] as usize != cols {
        return Err(VisionError::Inference(format!(
            "unexpected {what} shape at index {index}: {shape:?}, expected [1, {rows}, {cols}]"
        )));
    }
    Ok(Array2::from_shape_vec((rows, cols), data.to_vec())?)
}

/// Decode the twelve detector outputs into detections scoring at or above
/// `score_threshold`. The final score is sigmoid(cls * obj).
pub fn decode_outputs(
    outputs: &[(&[i64], &[f32])],
    score_threshold: f32,
    input_size: usize,
) -> Result<Vec<RawDetection>, VisionError> {
    let mut detections = Vec::new();

    for (scale, &stride) in STRIDES.iter().enumerate() {
        let grid = input_size / stride;
        let cells = grid * grid;

        let cls = plane(outputs, scale, cells, 1, "cls")?;
        let obj = plane(outputs, scale + 3, cells, 1, "obj")?;
        let bbox = plane(outputs, scale + 6, cells, 4, "bbox")?;
        let kps = plane(outputs, scale + 9, cells, 10, "kps")?;

        let norm = input_size as f32;
        for row in 0..grid {
            for col in 0..grid {
                let idx = row * grid + col;
                let score = sigmoid(cls[[idx, 0]] * obj[[idx, 0]]);
                if score < score_threshold {
                    continue;
                }

                let cx = (col as f32 + bbox[[idx, 0]]) * stride as f32 / norm;
                let cy = (row as f32 + bbox[[idx, 1]]) * stride as f32 / norm;
                let w = bbox[[idx, 2]] * stride as f32 / norm;
                let h = bbox[[idx, 3]] * stride as f32 / norm;

                let mut landmarks = [0f32; 10];
                for point in 0..5 {
                    landmarks[point * 2] =
                        (col as f32 + kps[[idx, point * 2]]) * stride as f32 / norm;
                    landmarks[point * 2 + 1] =
                        (row as f32 + kps[[idx, point * 2 + 1]]) * stride as f32 / norm;
                }

                detections.push(RawDetection {
                    bbox: [cx - w / 2.0, cy - h / 2.0, w, h],
                    score,
                    landmarks,
                });
            }
        }
    }

    Ok(detections)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zeros(rows: usize, cols: usize) -> (Vec<i64>, Vec<f32>) {
        (vec![1, rows as i64, cols as i64], vec![0.0; rows * cols])
    }

    #[test]
    fn sigmoid_midpoint_and_saturation() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-6);
        assert!(sigmoid(10.0) > 0.99);
        assert!(sigmoid(-10.0) < 0.01);
    }

    #[test]
    fn decode_single_cell_activation() {
        let input_size = 640;
        let grids = [80 * 80, 40 * 40, 20 * 20];

        // One activated cell at (row 10, col 10) on the stride-32 grid.
        let mut tensors: Vec<(Vec<i64>, Vec<f32>)> = Vec::new();
        for &cells in &grids {
            tensors.push(zeros(cells, 1)); // cls
        }
        let grid = 20;
        let idx = 10 * grid + 10;
        tensors[2].1[idx] = 8.0;

        for (i, &cells) in grids.iter().enumerate() {
            tensors.push(zeros(cells, 1)); // obj
            if i == 2 {
                tensors[5].1[idx] = 1.0;
            }
        }
        for &cells in &grids {
            tensors.push(zeros(cells, 4)); // bbox
        }
        tensors[8].1[idx * 4] = 0.5; // dx
        tensors[8].1[idx * 4 + 1] = 0.3; // dy
        tensors[8].1[idx * 4 + 2] = 4.0; // dw: 4 * 32 = 128 px
        tensors[8].1[idx * 4 + 3] = 4.0;
        for &cells in &grids {
            tensors.push(zeros(cells, 10)); // kps, zero deltas
        }

        let refs: Vec<(&[i64], &[f32])> = tensors
            .iter()
            .map(|(s, d)| (s.as_slice(), d.as_slice()))
            .collect();

        // Idle cells land exactly on sigmoid(0) = 0.5, so threshold above it.
        let detections = decode_outputs(&refs, 0.6, input_size).unwrap();
        assert_eq!(detections.len(), 1);

        // cx = (10 + 0.5) * 32 / 640 = 0.525, cy = (10 + 0.3) * 32 / 640 = 0.515
        // w = h = 4 * 32 / 640 = 0.2, so x = 0.425 and y = 0.415.
        let det = &detections[0];
        assert!((det.bbox[0] - 0.425).abs() < 1e-5);
        assert!((det.bbox[1] - 0.415).abs() < 1e-5);
        assert!((det.bbox[2] - 0.2).abs() < 1e-5);
        assert!((det.bbox[3] - 0.2).abs() < 1e-5);
        assert!((det.score - sigmoid(8.0)).abs() < 1e-5);

        // Zero landmark delta decodes to the cell itself: 10 * 32 / 640 = 0.5.
        assert!((det.landmarks[0] - 0.5).abs() < 1e-5);
        assert!((det.landmarks[1] - 0.5).abs() < 1e-5);
    }

    #[test]
    fn decode_rejects_bad_shapes() {
        // Stride-8 cls tensor with the wrong cell count.
        let mut tensors: Vec<(Vec<i64>, Vec<f32>)> = vec![zeros(100, 1)];
        for &cells in &[40 * 40, 20 * 20] {
            tensors.push(zeros(cells, 1));
        }
        for &cells in &[80 * 80, 40 * 40, 20 * 20] {
            tensors.push(zeros(cells, 1));
        }
        for &cells in &[80 * 80, 40 * 40, 20 * 20] {
            tensors.push(zeros(cells, 4));
        }
        for &cells in &[80 * 80, 40 * 40, 20 * 20] {
            tensors.push(zeros(cells, 10));
        }
        let refs: Vec<(&[i64], &[f32])> = tensors
            .iter()
            .map(|(s, d)| (s.as_slice(), d.as_slice()))
            .collect();

        match decode_outputs(&refs, 0.5, 640) {
            Err(VisionError::Inference(msg)) => assert!(msg.contains("cls")),
            other => panic!("expected shape error, got {other:?}"),
        }
    }
}
