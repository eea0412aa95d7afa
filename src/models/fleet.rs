//! Read-only records owned by the booking store and the driver/vehicle registry.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::assignment::GeoPoint;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub pickup: Option<GeoPoint>,
    pub dropoff: Option<GeoPoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Driver {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub is_available: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: Uuid,
    pub name: String,
    pub plate_number: String,
    pub is_available: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BookingSummary {
    pub id: Uuid,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DriverSummary {
    pub id: Uuid,
    pub full_name: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VehicleSummary {
    pub id: Uuid,
    pub name: String,
    pub plate_number: String,
}

impl From<&Booking> for BookingSummary {
    fn from(booking: &Booking) -> Self {
        Self {
            id: booking.id,
            customer_name: booking.customer_name.clone(),
            customer_phone: booking.customer_phone.clone(),
        }
    }
}

impl From<&Driver> for DriverSummary {
    fn from(driver: &Driver) -> Self {
        Self {
            id: driver.id,
            full_name: format!("{} {}", driver.first_name, driver.last_name),
            phone: driver.phone.clone(),
        }
    }
}

impl From<&Vehicle> for VehicleSummary {
    fn from(vehicle: &Vehicle) -> Self {
        Self {
            id: vehicle.id,
            name: vehicle.name.clone(),
            plate_number: vehicle.plate_number.clone(),
        }
    }
}
