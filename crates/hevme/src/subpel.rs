//! Fractional-sample planes and subpel refinement.
//!
//! Each layer-0 reference carries three precomputed half-pel planes
//! (half-x, half-y, and half-x-half-y, the last filtered from the half-x
//! plane). Quarter-pel samples are averaged on the fly from the two nearest
//! half-grid points. Refinement runs a half-pel diamond followed by a
//! quarter-pel diamond, scoring with SATD or SAD per preset.

use hevme_core::{MotionVector, MvRange, Plane, PlaneView, SearchNode};
use hevme_kernels::{satd_mxn, sad};

/// The four offsets of a subpel diamond, in the units of the pass.
const DIAMOND: [(i16, i16); 4] = [(-1, 0), (1, 0), (0, -1), (0, 1)];

/// Precomputed fractional-sample planes for one reference.
#[derive(Debug, Clone)]
pub struct SubpelPlanes {
    /// Half-pel horizontal, full vertical.
    pub hxfy: Plane,
    /// Full horizontal, half-pel vertical.
    pub fxhy: Plane,
    /// Half-pel in both; filtered from `hxfy`.
    pub hxhy: Plane,
}

impl SubpelPlanes {
    /// Build all three planes from the fullpel reconstruction.
    pub fn build(full: &Plane) -> Self {
        let (w, h) = (full.width(), full.height());
        let mut hxfy = Plane::new(w, h, full.pad());
        let mut fxhy = Plane::new(w, h, full.pad());
        for y in 0..h {
            for x in 0..w {
                let (xi, yi) = (x as isize, y as isize);
                let hx = ((full.pixel(xi, yi) as u16 + full.pixel(xi + 1, yi) as u16 + 1) >> 1) as u8;
                let hy = ((full.pixel(xi, yi) as u16 + full.pixel(xi, yi + 1) as u16 + 1) >> 1) as u8;
                hxfy.set_pixel(x, y, hx);
                fxhy.set_pixel(x, y, hy);
            }
        }
        hxfy.pad_borders();
        fxhy.pad_borders();

        // The fourth plane comes from the half-x plane, not the source.
        let mut hxhy = Plane::new(w, h, full.pad());
        for y in 0..h {
            for x in 0..w {
                let (xi, yi) = (x as isize, y as isize);
                let v = ((hxfy.pixel(xi, yi) as u16 + hxfy.pixel(xi, yi + 1) as u16 + 1) >> 1) as u8;
                hxhy.set_pixel(x, y, v);
            }
        }
        hxhy.pad_borders();
        Self { hxfy, fxhy, hxhy }
    }
}

/// A reference at layer 0: the fullpel plane plus its subpel planes.
pub struct SubpelRef<'a> {
    pub full: &'a Plane,
    pub planes: &'a SubpelPlanes,
}

impl<'a> SubpelRef<'a> {
    /// View of the half-grid point `(hx, hy)` (half-pel units) anchored at
    /// picture position `(px, py)`.
    fn half_view(&self, px: i32, py: i32, hx: i32, hy: i32) -> PlaneView<'a> {
        let plane = match (hx & 1, hy & 1) {
            (0, 0) => self.full,
            (1, 0) => &self.planes.hxfy,
            (0, 1) => &self.planes.fxhy,
            _ => &self.planes.hxhy,
        };
        plane.view((px + (hx >> 1)) as isize, (py + (hy >> 1)) as isize)
    }

    /// Interpolate the prediction block for a quarter-pel MV into `out`.
    pub fn interp_into(
        &self,
        px: i32,
        py: i32,
        mv: MotionVector,
        w: usize,
        h: usize,
        out: &mut [u8],
    ) {
        let hx = mv.x as i32 >> 1;
        let hy = mv.y as i32 >> 1;
        let (rx, ry) = (mv.x as i32 & 1, mv.y as i32 & 1);
        let a = self.half_view(px, py, hx, hy);
        if rx == 0 && ry == 0 {
            for y in 0..h {
                out[y * w..(y + 1) * w].copy_from_slice(a.row(y, w));
            }
            return;
        }
        // Quarter position: average the floor half-grid point with the next
        // one along the fractional direction.
        let b = self.half_view(px, py, hx + rx, hy + ry);
        for y in 0..h {
            let ra = a.row(y, w);
            let rb = b.row(y, w);
            for x in 0..w {
                out[y * w + x] = ((ra[x] as u16 + rb[x] as u16 + 1) >> 1) as u8;
            }
        }
    }
}

/// Distortion of a subpel position against the source block.
#[allow(clippy::too_many_arguments)]
fn subpel_distortion(
    src: &PlaneView<'_>,
    src_stride: usize,
    refp: &SubpelRef<'_>,
    px: i32,
    py: i32,
    mv: MotionVector,
    w: usize,
    h: usize,
    use_satd: bool,
    scratch: &mut Vec<u8>,
) -> u32 {
    scratch.clear();
    scratch.resize(w * h, 0);
    refp.interp_into(px, py, mv, w, h, scratch);
    if use_satd {
        satd_mxn(src.data, src_stride, scratch, w, w, h)
    } else {
        sad(src.data, src_stride, scratch, w, w, h)
    }
}

/// Refine one fullpel result to quarter-pel precision.
///
/// A half-pel diamond around the fullpel winner, then a quarter-pel diamond
/// around the half-pel winner. The MV cost carried in the node is kept; the
/// distortion is re-evaluated at each position. Marks `subpel_done`.
#[allow(clippy::too_many_arguments)]
pub fn subpel_refine(
    src: &Plane,
    refp: &SubpelRef<'_>,
    px: i32,
    py: i32,
    w: usize,
    h: usize,
    fpel_node: &SearchNode,
    range_qpel: &MvRange,
    use_satd: bool,
    scratch: &mut Vec<u8>,
) -> SearchNode {
    let src_view = src.view(px as isize, py as isize);
    let src_stride = src.stride();

    // Seed with the fullpel position expressed in qpel units.
    let mut best = *fpel_node;
    best.mv = MotionVector::from_fullpel(fpel_node.mv.x, fpel_node.mv.y);
    best.sad = subpel_distortion(
        &src_view, src_stride, refp, px, py, best.mv, w, h, use_satd, scratch,
    );
    best.total_cost = best.sad + best.mv_cost;

    for step in [2i16, 1] {
        let center = best.mv;
        for (dx, dy) in DIAMOND {
            let mv = MotionVector::new(center.x + dx * step, center.y + dy * step);
            if !range_qpel.contains(mv) {
                continue;
            }
            let dist = subpel_distortion(
                &src_view, src_stride, refp, px, py, mv, w, h, use_satd, scratch,
            );
            let total = dist + best.mv_cost;
            if total < best.total_cost {
                best = SearchNode { mv, sad: dist, total_cost: total, ..best };
            }
        }
    }
    best.set_subpel_done();
    best
}
