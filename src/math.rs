use glam::Vec3;

/// Doubled signed area of the triangle (a, b, c) projected onto the XY plane.
///
/// Contour rings are wound clockwise, which makes the value negative for a
/// point `b` on the inner side of the directed line `a -> c`.
pub(crate) fn signed_area_x2(a: Vec3, b: Vec3, c: Vec3) -> f32 {
    (b.y - a.y) * (c.x - a.x) - (c.y - a.y) * (b.x - a.x)
}

pub(crate) fn is_left(point: Vec3, line_start: Vec3, line_end: Vec3) -> bool {
    signed_area_x2(line_start, point, line_end) < 0.0
}

pub(crate) fn is_left_or_collinear(point: Vec3, line_start: Vec3, line_end: Vec3) -> bool {
    signed_area_x2(line_start, point, line_end) <= 0.0
}

pub(crate) fn is_right(point: Vec3, line_start: Vec3, line_end: Vec3) -> bool {
    signed_area_x2(line_start, point, line_end) > 0.0
}

pub(crate) fn is_right_or_collinear(point: Vec3, line_start: Vec3, line_end: Vec3) -> bool {
    signed_area_x2(line_start, point, line_end) >= 0.0
}

/// `point` lies on the segment (start, end), endpoints included.
fn between(start: Vec3, end: Vec3, point: Vec3) -> bool {
    if signed_area_x2(start, point, end) != 0.0 {
        return false;
    }

    if start.x != end.x {
        (start.x <= point.x && point.x <= end.x) || (start.x >= point.x && point.x >= end.x)
    } else {
        (start.y <= point.y && point.y <= end.y) || (start.y >= point.y && point.y >= end.y)
    }
}

/// The segments (a, b) and (c, d) properly cross in XY, intersecting at a
/// single point interior to both.
pub(crate) fn intersect_prop(a: Vec3, b: Vec3, c: Vec3, d: Vec3) -> bool {
    let c_area = signed_area_x2(a, c, b);
    let d_area = signed_area_x2(a, d, b);
    let a_area = signed_area_x2(c, a, d);
    let b_area = signed_area_x2(c, b, d);

    if c_area == 0.0 || d_area == 0.0 || a_area == 0.0 || b_area == 0.0 {
        return false;
    }

    ((c_area > 0.0) != (d_area > 0.0)) && ((a_area > 0.0) != (b_area > 0.0))
}

/// The segments (a, b) and (c, d) intersect in XY, properly or improperly
/// (touching endpoints and collinear overlap included).
pub(crate) fn intersect(a: Vec3, b: Vec3, c: Vec3, d: Vec3) -> bool {
    intersect_prop(a, b, c, d)
        || between(a, b, c)
        || between(a, b, d)
        || between(c, d, a)
        || between(c, d, b)
}
