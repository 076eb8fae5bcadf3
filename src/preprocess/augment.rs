//! 学習時のランダムデータ拡張
//!
//! 回転・平行移動・せん断・拡大縮小・左右反転を1回のアフィン変換にまとめ、
//! 出力画素ごとに入力座標を逆算して最近傍でサンプリングします。
//! 範囲外の座標は端の画素で埋めます。

use image::RgbImage;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// 拡張パラメータの範囲
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Augmentation {
    /// 回転角の範囲（度、±）
    pub rotation_range: f32,
    /// 横方向シフト（幅に対する割合、±）
    pub width_shift_range: f32,
    /// 縦方向シフト（高さに対する割合、±）
    pub height_shift_range: f32,
    /// せん断角の範囲（度、±）
    pub shear_range: f32,
    /// 拡大率の範囲 [1 - zoom, 1 + zoom]（軸ごとに独立）
    pub zoom_range: f32,
    /// 50% の確率で左右反転
    pub horizontal_flip: bool,
}

impl Default for Augmentation {
    fn default() -> Self {
        Self {
            rotation_range: 20.0,
            width_shift_range: 0.2,
            height_shift_range: 0.2,
            shear_range: 0.2,
            zoom_range: 0.2,
            horizontal_flip: true,
        }
    }
}

impl Augmentation {
    /// 何もしない拡張（検証・推論と同じ結果になる）
    pub fn none() -> Self {
        Self {
            rotation_range: 0.0,
            width_shift_range: 0.0,
            height_shift_range: 0.0,
            shear_range: 0.0,
            zoom_range: 0.0,
            horizontal_flip: false,
        }
    }

    /// サンプルごとに独立した変換を1つ引く
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> AffineParams {
        AffineParams {
            rotation_deg: symmetric(rng, self.rotation_range),
            shift_x: symmetric(rng, self.width_shift_range),
            shift_y: symmetric(rng, self.height_shift_range),
            shear_deg: symmetric(rng, self.shear_range),
            zoom_x: 1.0 + symmetric(rng, self.zoom_range),
            zoom_y: 1.0 + symmetric(rng, self.zoom_range),
            flip: self.horizontal_flip && rng.gen_bool(0.5),
        }
    }
}

fn symmetric<R: Rng + ?Sized>(rng: &mut R, range: f32) -> f32 {
    if range <= 0.0 {
        0.0
    } else {
        rng.gen_range(-range..=range)
    }
}

/// 1サンプル分の具体的な変換
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineParams {
    pub rotation_deg: f32,
    /// 幅に対する割合
    pub shift_x: f32,
    /// 高さに対する割合
    pub shift_y: f32,
    pub shear_deg: f32,
    pub zoom_x: f32,
    pub zoom_y: f32,
    pub flip: bool,
}

impl AffineParams {
    pub fn identity() -> Self {
        Self {
            rotation_deg: 0.0,
            shift_x: 0.0,
            shift_y: 0.0,
            shear_deg: 0.0,
            zoom_x: 1.0,
            zoom_y: 1.0,
            flip: false,
        }
    }

    fn is_geometric_identity(&self) -> bool {
        self.rotation_deg == 0.0
            && self.shift_x == 0.0
            && self.shift_y == 0.0
            && self.shear_deg == 0.0
            && self.zoom_x == 1.0
            && self.zoom_y == 1.0
    }

    /// 出力座標 -> 入力座標の行列（画像中心基準）
    fn matrix(&self) -> [[f32; 2]; 2] {
        let theta = self.rotation_deg.to_radians();
        let (sin_t, cos_t) = theta.sin_cos();
        let (sin_s, cos_s) = self.shear_deg.to_radians().sin_cos();

        // rotation * shear * zoom
        let rs = [
            [cos_t, -cos_t * sin_s - sin_t * cos_s],
            [sin_t, -sin_t * sin_s + cos_t * cos_s],
        ];
        [
            [rs[0][0] * self.zoom_x, rs[0][1] * self.zoom_y],
            [rs[1][0] * self.zoom_x, rs[1][1] * self.zoom_y],
        ]
    }

    pub fn apply(&self, image: &RgbImage) -> RgbImage {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return image.clone();
        }

        let mut out = if self.is_geometric_identity() {
            image.clone()
        } else {
            let m = self.matrix();
            let cx = (width as f32 - 1.0) / 2.0;
            let cy = (height as f32 - 1.0) / 2.0;
            let tx = self.shift_x * width as f32;
            let ty = self.shift_y * height as f32;
            let max_x = (width - 1) as f32;
            let max_y = (height - 1) as f32;

            RgbImage::from_fn(width, height, |x, y| {
                let u = x as f32 - cx;
                let v = y as f32 - cy;
                let src_x = m[0][0] * u + m[0][1] * v + cx + tx;
                let src_y = m[1][0] * u + m[1][1] * v + cy + ty;
                // fill_mode = nearest: 範囲外は端の画素
                let sx = src_x.round().clamp(0.0, max_x) as u32;
                let sy = src_y.round().clamp(0.0, max_y) as u32;
                *image.get_pixel(sx, sy)
            })
        };

        if self.flip {
            image::imageops::flip_horizontal_in_place(&mut out);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| Rgb([x as u8 * 10, y as u8 * 10, 0]))
    }

    #[test]
    fn test_identity_keeps_image() {
        let img = gradient(7, 5);
        assert_eq!(AffineParams::identity().apply(&img), img);
    }

    #[test]
    fn test_none_samples_identity() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..10 {
            assert_eq!(Augmentation::none().sample(&mut rng), AffineParams::identity());
        }
    }

    #[test]
    fn test_flip_mirrors_columns() {
        let img = gradient(4, 2);
        let flipped = AffineParams {
            flip: true,
            ..AffineParams::identity()
        }
        .apply(&img);
        assert_eq!(flipped.get_pixel(0, 1), img.get_pixel(3, 1));
        assert_eq!(flipped.get_pixel(3, 0), img.get_pixel(0, 0));
    }

    #[test]
    fn test_shift_fills_with_edge_pixels() {
        let img = gradient(10, 10);
        // 入力を右に 50% ずらして読む -> 右半分は端の列で埋まる
        let shifted = AffineParams {
            shift_x: 0.5,
            ..AffineParams::identity()
        }
        .apply(&img);
        assert_eq!(shifted.get_pixel(0, 3), img.get_pixel(5, 3));
        assert_eq!(shifted.get_pixel(9, 3), img.get_pixel(9, 3));
        assert_eq!(shifted.get_pixel(7, 3), img.get_pixel(9, 3));
    }

    #[test]
    fn test_sampled_params_within_range() {
        let aug = Augmentation::default();
        let mut rng = StdRng::seed_from_u64(42);
        let mut flips = 0;
        for _ in 0..500 {
            let p = aug.sample(&mut rng);
            assert!(p.rotation_deg.abs() <= 20.0);
            assert!(p.shift_x.abs() <= 0.2 && p.shift_y.abs() <= 0.2);
            assert!(p.shear_deg.abs() <= 0.2);
            assert!((0.8..=1.2).contains(&p.zoom_x) && (0.8..=1.2).contains(&p.zoom_y));
            if p.flip {
                flips += 1;
            }
        }
        assert!(flips > 150 && flips < 350);
    }

    #[test]
    fn test_shear_is_in_degrees() {
        let m = AffineParams {
            shear_deg: 30.0,
            ..AffineParams::identity()
        }
        .matrix();
        let expected = [[1.0, -0.5], [0.0, 3.0f32.sqrt() / 2.0]];
        for row in 0..2 {
            for col in 0..2 {
                assert!((m[row][col] - expected[row][col]).abs() < 1e-6, "{:?}", m);
            }
        }

        // 0.2 度のせん断は 10x10 の画像をほぼ動かさない
        let img = gradient(10, 10);
        let out = AffineParams {
            shear_deg: 0.2,
            ..AffineParams::identity()
        }
        .apply(&img);
        assert_eq!(out, img);
    }

    #[test]
    fn test_apply_keeps_dimensions() {
        let img = gradient(12, 9);
        let mut rng = StdRng::seed_from_u64(5);
        let out = Augmentation::default().sample(&mut rng).apply(&img);
        assert_eq!(out.dimensions(), (12, 9));
    }
}
