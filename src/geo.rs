use thiserror::Error;

use crate::models::assignment::GeoPoint;

#[derive(Error, Debug, PartialEq)]
pub enum PolygonError {
    #[error("polygon needs at least 3 vertices, got {0}")]
    TooFewVertices(usize),

    #[error("polygon vertex {0} has a non-finite coordinate")]
    NonFiniteVertex(usize),
}

pub fn is_valid_coordinate(lat: f64, lng: f64) -> bool {
    lat.is_finite()
        && lng.is_finite()
        && (-90.0..=90.0).contains(&lat)
        && (-180.0..=180.0).contains(&lng)
}

/// Even-odd ray casting. Longitude is treated as x and latitude as y, which is
/// accurate enough for city-scale zones that do not straddle the antimeridian.
pub fn point_in_polygon(lat: f64, lng: f64, polygon: &[GeoPoint]) -> Result<bool, PolygonError> {
    if polygon.len() < 3 {
        return Err(PolygonError::TooFewVertices(polygon.len()));
    }
    if let Some(idx) = polygon
        .iter()
        .position(|v| !v.lat.is_finite() || !v.lng.is_finite())
    {
        return Err(PolygonError::NonFiniteVertex(idx));
    }

    let mut inside = false;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let (xi, yi) = (polygon[i].lng, polygon[i].lat);
        let (xj, yj) = (polygon[j].lng, polygon[j].lat);

        if (yi > lat) != (yj > lat) && lng < (xj - xi) * (lat - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }

    Ok(inside)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<GeoPoint> {
        vec![
            GeoPoint::new(35.0, 139.0),
            GeoPoint::new(35.0, 140.0),
            GeoPoint::new(36.0, 140.0),
            GeoPoint::new(36.0, 139.0),
        ]
    }

    #[test]
    fn test_point_inside_and_outside() {
        assert_eq!(point_in_polygon(35.5, 139.5, &square()), Ok(true));
        assert_eq!(point_in_polygon(34.5, 139.5, &square()), Ok(false));
        assert_eq!(point_in_polygon(35.5, 141.0, &square()), Ok(false));
    }

    #[test]
    fn test_concave_polygon() {
        // U shape open to the north
        let u = vec![
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(0.0, 3.0),
            GeoPoint::new(3.0, 3.0),
            GeoPoint::new(3.0, 2.0),
            GeoPoint::new(1.0, 2.0),
            GeoPoint::new(1.0, 1.0),
            GeoPoint::new(3.0, 1.0),
            GeoPoint::new(3.0, 0.0),
        ];
        assert_eq!(point_in_polygon(0.5, 1.5, &u), Ok(true));
        assert_eq!(point_in_polygon(2.0, 1.5, &u), Ok(false));
    }

    #[test]
    fn test_malformed_polygons() {
        let line = vec![GeoPoint::new(0.0, 0.0), GeoPoint::new(1.0, 1.0)];
        assert_eq!(
            point_in_polygon(0.5, 0.5, &line),
            Err(PolygonError::TooFewVertices(2))
        );

        let mut bad = square();
        bad[2].lat = f64::NAN;
        assert_eq!(
            point_in_polygon(35.5, 139.5, &bad),
            Err(PolygonError::NonFiniteVertex(2))
        );
    }

    #[test]
    fn test_coordinate_ranges() {
        assert!(is_valid_coordinate(-90.0, 180.0));
        assert!(!is_valid_coordinate(91.0, 0.0));
        assert!(!is_valid_coordinate(0.0, f64::INFINITY));
    }
}
