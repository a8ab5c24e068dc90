//! Edge feathering: distance-weighted smoothing of transitional alpha.
//!
//! Only pixels whose alpha is strictly between 0 and 255 are touched.
//! Because classification, refinement and cleaning all produce strictly
//! binary masks, feathering the default pipeline output changes nothing;
//! it only has an effect on buffers that already carry intermediate
//! alpha values (for example after contrast refinement of a soft mask,
//! or when driven directly on a caller-supplied buffer).

use crate::composite::alpha_channel;
use crate::types::RgbaImage;

/// Weight of a neighbor at `distance` for the given window `radius`.
///
/// Falls linearly from 1 at the center to 0 at `radius`. A zero radius
/// has no window and every weight is 0.
#[must_use]
pub fn weight(distance: f32, radius: u32) -> f32 {
    if radius == 0 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let r = radius as f32;
    (1.0 - distance / r).max(0.0)
}

/// Feather transitional alpha values in place.
///
/// Each pixel with `0 < alpha < 255` is replaced by the weighted mean of
/// the alpha values in the square window of side `2 * radius + 1`
/// around it (clipped to the image), using [`weight`]. Weights are read
/// from a snapshot of the alpha channel taken before any pixel is
/// modified, so the result does not depend on scan order.
///
/// Returns the number of pixels that were feathered. A zero radius
/// leaves the image untouched and returns 0.
pub fn feather(image: &mut RgbaImage, radius: u32) -> u64 {
    if radius == 0 {
        return 0;
    }
    let (w, h) = image.dimensions();
    let alpha = alpha_channel(image);
    let r = i64::from(radius);
    let mut feathered = 0_u64;

    for y in 0..h {
        for x in 0..w {
            let a = alpha.get_pixel(x, y).0[0];
            if a == 0 || a == 255 {
                continue;
            }

            let mut sum = 0.0_f32;
            let mut total_weight = 0.0_f32;
            for dy in -r..=r {
                for dx in -r..=r {
                    let nx = i64::from(x) + dx;
                    let ny = i64::from(y) + dy;
                    let (Ok(nx), Ok(ny)) = (u32::try_from(nx), u32::try_from(ny)) else {
                        continue;
                    };
                    if nx >= w || ny >= h {
                        continue;
                    }
                    #[allow(clippy::cast_precision_loss)]
                    let distance = ((dx * dx + dy * dy) as f32).sqrt();
                    let wgt = weight(distance, radius);
                    if wgt > 0.0 {
                        sum += f32::from(alpha.get_pixel(nx, ny).0[0]) * wgt;
                        total_weight += wgt;
                    }
                }
            }

            // The center always contributes weight 1.
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let value = (sum / total_weight).round().clamp(0.0, 255.0) as u8;
            image.get_pixel_mut(x, y).0[3] = value;
            feathered += 1;
        }
    }

    tracing::debug!(radius, feathered, "edge feathering");
    feathered
}
