//! Operator-facing visualization of the trigger region.

use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::geofence::Geofence;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rgba {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

/// A translucent cube drawn over the geofence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeofenceMarker {
    pub frame_id: String,
    pub namespace: String,
    pub id: i32,
    pub center: Point3<f64>,
    pub scale: Vector3<f64>,
    pub color: Rgba,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarkerStyle {
    pub frame_id: String,
    pub namespace: String,
    pub id: i32,
    pub height: f64,
    pub idle: Rgba,
    pub activated: Rgba,
}

impl GeofenceMarker {
    /// Cube covering the region, resting on the ground plane.
    pub fn for_region(region: &Geofence, style: &MarkerStyle, activated: bool) -> Self {
        let center = region.center();
        let extent = region.extent();
        Self {
            frame_id: style.frame_id.clone(),
            namespace: style.namespace.clone(),
            id: style.id,
            center: Point3::new(center.x, center.y, style.height / 2.0),
            scale: Vector3::new(extent.x, extent.y, style.height),
            color: if activated { style.activated } else { style.idle },
        }
    }
}

/// Visualization sink. Publishing is fire-and-forget and off the decision path.
pub trait MarkerSink: Send + Sync {
    fn publish(&self, marker: GeofenceMarker);
}

/// Sink that logs the marker geometry.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingMarkerSink;

impl MarkerSink for LoggingMarkerSink {
    fn publish(&self, marker: GeofenceMarker) {
        info!(
            ns = %marker.namespace,
            x = marker.center.x,
            y = marker.center.y,
            width = marker.scale.x,
            depth = marker.scale.y,
            "geofence marker"
        );
    }
}
