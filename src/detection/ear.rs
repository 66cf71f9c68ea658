//! Eye aspect ratio from face-mesh landmarks.

use serde::{Deserialize, Serialize};

/// Number of points in a face-mesh landmark set.
pub const FACE_MESH_POINTS: usize = 468;

/// Landmark indices for each eye, ordered p1..p6: outer corner, two upper-lid
/// points, inner corner, two lower-lid points.
pub const LEFT_EYE: [usize; 6] = [33, 160, 158, 133, 153, 144];
pub const RIGHT_EYE: [usize; 6] = [362, 385, 387, 263, 373, 380];

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f64,
    pub y: f64,
}

impl Landmark {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    fn distance(self, other: Landmark) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// EAR of a single eye: (|p2-p6| + |p3-p5|) / (2 * |p1-p4|).
///
/// Returns `None` when an index is missing or the eye has no width.
pub fn eye_aspect_ratio(landmarks: &[Landmark], indices: &[usize; 6]) -> Option<f64> {
    let mut points = [Landmark::default(); 6];
    for (slot, &index) in points.iter_mut().zip(indices.iter()) {
        *slot = *landmarks.get(index)?;
    }
    let [p1, p2, p3, p4, p5, p6] = points;

    let vertical1 = p2.distance(p6);
    let vertical2 = p3.distance(p5);
    let horizontal = p1.distance(p4);

    if horizontal <= f64::EPSILON {
        return None;
    }

    Some((vertical1 + vertical2) / (2.0 * horizontal))
}

/// Mean of the left and right eye EARs.
pub fn mean_ear(landmarks: &[Landmark]) -> Option<f64> {
    let left = eye_aspect_ratio(landmarks, &LEFT_EYE)?;
    let right = eye_aspect_ratio(landmarks, &RIGHT_EYE)?;
    Some((left + right) / 2.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mesh() -> Vec<Landmark> {
        vec![Landmark::default(); FACE_MESH_POINTS]
    }

    fn place_eye(mesh: &mut [Landmark], indices: &[usize; 6], origin_x: f64, width: f64, gap: f64) {
        let [p1, p2, p3, p4, p5, p6] = *indices;
        mesh[p1] = Landmark::new(origin_x, 0.5);
        mesh[p4] = Landmark::new(origin_x + width, 0.5);
        mesh[p2] = Landmark::new(origin_x + width / 3.0, 0.5 - gap / 2.0);
        mesh[p6] = Landmark::new(origin_x + width / 3.0, 0.5 + gap / 2.0);
        mesh[p3] = Landmark::new(origin_x + 2.0 * width / 3.0, 0.5 - gap / 2.0);
        mesh[p5] = Landmark::new(origin_x + 2.0 * width / 3.0, 0.5 + gap / 2.0);
    }

    #[test]
    fn open_eye_ratio_matches_lid_gap() {
        let mut landmarks = mesh();
        place_eye(&mut landmarks, &LEFT_EYE, 0.2, 0.1, 0.035);

        let ear = eye_aspect_ratio(&landmarks, &LEFT_EYE).unwrap();
        assert!((ear - 0.35).abs() < 1e-9);
    }

    #[test]
    fn mean_averages_both_eyes() {
        let mut landmarks = mesh();
        place_eye(&mut landmarks, &LEFT_EYE, 0.2, 0.1, 0.04);
        place_eye(&mut landmarks, &RIGHT_EYE, 0.6, 0.1, 0.02);

        let ear = mean_ear(&landmarks).unwrap();
        assert!((ear - 0.3).abs() < 1e-9);
    }

    #[test]
    fn degenerate_or_short_meshes_yield_none() {
        assert_eq!(mean_ear(&[Landmark::default(); 10]), None);
        assert_eq!(mean_ear(&mesh()), None);
    }
}
