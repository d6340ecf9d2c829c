//! Angle and line-fitting primitives shared by landmark extraction and the
//! collision map's ray traversal.

use std::f64::consts::TAU;

/// A line in implicit form `a*x + b*y + c = 0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Line {
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

/// Normalizes `angle` to `[0, tau)`.
pub fn normalize_angle(angle: f64) -> f64 {
    let wrapped = angle % TAU;
    if wrapped < 0.0 {
        wrapped + TAU
    } else {
        wrapped
    }
}

/// Computes `b - a` mapped into `[-pi, pi]`, taking whichever of
/// `{diff, diff + tau, diff - tau}` has the smallest absolute value.
///
/// `a` and `b` need not be pre-normalized: the source normalizes both
/// before differencing, but since differencing is invariant mod tau the
/// result is identical whether or not that normalization happens first.
pub fn normalized_angle_difference(a: f64, b: f64) -> f64 {
    let diff = b - a;
    [diff, diff + TAU, diff - TAU]
        .into_iter()
        .min_by(|x, y| x.abs().partial_cmp(&y.abs()).unwrap())
        .unwrap()
}

/// Least-squares line fit through `points`, returned as `a*x + b*y + c = 0`.
///
/// Falls back to the vertical-line form (`a = -1, b = 0`) when the normal
/// equations are singular (`n*sxx - sx*sx == 0`), replacing the source's
/// `ZeroDivisionError` catch with an explicit branch.
pub fn linear_regression(points: &[(f64, f64)]) -> Line {
    let n = points.len() as f64;
    let sx: f64 = points.iter().map(|p| p.0).sum();
    let sy: f64 = points.iter().map(|p| p.1).sum();
    let sxx: f64 = points.iter().map(|p| p.0 * p.0).sum();
    let sxy: f64 = points.iter().map(|p| p.0 * p.1).sum();

    let denom = (n * sxx) - (sx * sx);
    if denom == 0.0 {
        return Line {
            a: -1.0,
            b: 0.0,
            c: sx / n,
        };
    }

    let a = ((n * sxy) - (sx * sy)) / denom;
    let b = -1.0;
    let c = (sy / n) - ((a * sx) / n);
    Line { a, b, c }
}

/// Perpendicular distance from `point` to `line`.
pub fn min_distance(line: &Line, point: (f64, f64)) -> f64 {
    let (x, y) = point;
    ((line.a * x) + (line.b * y) + line.c).abs() / (line.a * line.a + line.b * line.b).sqrt()
}

/// The point on `line` closest to `point`.
pub fn closest_point(line: &Line, point: (f64, f64)) -> (f64, f64) {
    let Line { a, b, c } = *line;
    let (x, y) = point;
    let denom = (a * a) + (b * b);
    let line_x = ((b * ((b * x) - (a * y))) - (a * c)) / denom;
    let line_y = ((a * ((a * y) - (b * x))) - (b * c)) / denom;
    (line_x, line_y)
}
