pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS dispatch_assignments (
    id UUID PRIMARY KEY,
    booking_id UUID NOT NULL,
    driver_id UUID,
    vehicle_id UUID,
    assigned_by UUID,
    status TEXT NOT NULL,
    assigned_at TIMESTAMPTZ,
    started_at TIMESTAMPTZ,
    arrived_at TIMESTAMPTZ,
    completed_at TIMESTAMPTZ,
    cancelled_at TIMESTAMPTZ,
    estimated_arrival TIMESTAMPTZ,
    actual_arrival TIMESTAMPTZ,
    pickup_location JSONB,
    dropoff_location JSONB,
    route_summary JSONB,
    distance_km DOUBLE PRECISION,
    estimated_duration_minutes INTEGER,
    actual_duration_minutes INTEGER,
    priority INTEGER NOT NULL DEFAULT 0,
    notes TEXT,
    version BIGINT NOT NULL DEFAULT 0,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS dispatch_assignments_active_booking
    ON dispatch_assignments (booking_id)
    WHERE status NOT IN ('completed', 'cancelled');
CREATE UNIQUE INDEX IF NOT EXISTS dispatch_assignments_active_driver
    ON dispatch_assignments (driver_id)
    WHERE driver_id IS NOT NULL AND status NOT IN ('completed', 'cancelled');
CREATE UNIQUE INDEX IF NOT EXISTS dispatch_assignments_active_vehicle
    ON dispatch_assignments (vehicle_id)
    WHERE vehicle_id IS NOT NULL AND status NOT IN ('completed', 'cancelled');

CREATE TABLE IF NOT EXISTS tracking_devices (
    device_id TEXT PRIMARY KEY,
    vehicle_id UUID,
    driver_id UUID,
    is_active BOOLEAN NOT NULL DEFAULT true,
    last_seen TIMESTAMPTZ,
    battery_level INTEGER
);

CREATE TABLE IF NOT EXISTS vehicle_locations (
    id UUID PRIMARY KEY,
    device_id TEXT NOT NULL,
    vehicle_id UUID,
    driver_id UUID,
    latitude DOUBLE PRECISION NOT NULL,
    longitude DOUBLE PRECISION NOT NULL,
    altitude DOUBLE PRECISION,
    accuracy DOUBLE PRECISION,
    speed DOUBLE PRECISION,
    bearing DOUBLE PRECISION,
    timestamp TIMESTAMPTZ NOT NULL,
    battery_level INTEGER,
    is_moving BOOLEAN NOT NULL,
    address TEXT,
    received_at TIMESTAMPTZ NOT NULL,
    UNIQUE (device_id, timestamp)
);
CREATE INDEX IF NOT EXISTS vehicle_locations_vehicle_time
    ON vehicle_locations (vehicle_id, timestamp DESC);

CREATE TABLE IF NOT EXISTS geofence_areas (
    id UUID PRIMARY KEY,
    name TEXT NOT NULL,
    geofence_type TEXT NOT NULL,
    polygon JSONB NOT NULL,
    is_active BOOLEAN NOT NULL DEFAULT true,
    assignment_id UUID
);

CREATE TABLE IF NOT EXISTS dispatch_notifications (
    id UUID PRIMARY KEY,
    assignment_id UUID,
    alert_id UUID,
    notification_type TEXT NOT NULL,
    title TEXT NOT NULL,
    message TEXT NOT NULL,
    priority TEXT NOT NULL,
    is_read BOOLEAN NOT NULL DEFAULT false,
    target_user UUID,
    created_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS emergency_alerts (
    id UUID PRIMARY KEY,
    alert_type TEXT NOT NULL,
    location JSONB,
    assignment_id UUID,
    vehicle_id UUID,
    driver_id UUID,
    message TEXT,
    is_resolved BOOLEAN NOT NULL DEFAULT false,
    resolved_at TIMESTAMPTZ,
    resolved_by UUID,
    created_at TIMESTAMPTZ NOT NULL
);
"#;

pub const ASSIGNMENT_ACTIVE_BOOKING_INDEX: &str = "dispatch_assignments_active_booking";
pub const ASSIGNMENT_ACTIVE_DRIVER_INDEX: &str = "dispatch_assignments_active_driver";
pub const ASSIGNMENT_ACTIVE_VEHICLE_INDEX: &str = "dispatch_assignments_active_vehicle";

pub const INSERT_ASSIGNMENT: &str = r#"
INSERT INTO dispatch_assignments (
    id, booking_id, driver_id, vehicle_id, assigned_by, status,
    assigned_at, started_at, arrived_at, completed_at, cancelled_at,
    estimated_arrival, actual_arrival, pickup_location, dropoff_location, route_summary,
    distance_km, estimated_duration_minutes, actual_duration_minutes,
    priority, notes, version, created_at, updated_at
) VALUES (
    $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
    $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24
);
"#;

pub const SELECT_ASSIGNMENT: &str = r#"
SELECT * FROM dispatch_assignments WHERE id = $1;
"#;

/// Compare-and-swap on version and prior status.
pub const UPDATE_ASSIGNMENT: &str = r#"
UPDATE dispatch_assignments
SET driver_id = $4,
    vehicle_id = $5,
    assigned_by = $6,
    status = $7,
    assigned_at = $8,
    started_at = $9,
    arrived_at = $10,
    completed_at = $11,
    cancelled_at = $12,
    actual_arrival = $13,
    actual_duration_minutes = $14,
    priority = $15,
    notes = $16,
    updated_at = $17,
    version = version + 1
WHERE id = $1 AND version = $2 AND status = $3
RETURNING *;
"#;

pub const UPDATE_ASSIGNMENT_ESTIMATE: &str = r#"
UPDATE dispatch_assignments
SET distance_km = $3,
    estimated_duration_minutes = $4,
    estimated_arrival = $5,
    route_summary = $6,
    updated_at = $7
WHERE id = $1 AND status = $2
RETURNING *;
"#;

pub const SELECT_ASSIGNMENTS_FILTERED: &str = r#"
SELECT * FROM dispatch_assignments
WHERE ($1::TEXT IS NULL OR status = $1)
  AND ($2::UUID IS NULL OR driver_id = $2)
  AND ($3::UUID IS NULL OR vehicle_id = $3)
  AND ($4::UUID IS NULL OR booking_id = $4)
ORDER BY priority ASC, created_at DESC;
"#;

pub const SELECT_ACTIVE_DRIVER_HOLDER: &str = r#"
SELECT id FROM dispatch_assignments
WHERE driver_id = $1 AND id <> $2 AND status NOT IN ('completed', 'cancelled')
LIMIT 1;
"#;

pub const SELECT_ACTIVE_VEHICLE_HOLDER: &str = r#"
SELECT id FROM dispatch_assignments
WHERE vehicle_id = $1 AND id <> $2 AND status NOT IN ('completed', 'cancelled')
LIMIT 1;
"#;

pub const SELECT_DEVICE: &str = r#"
SELECT device_id, vehicle_id, driver_id, is_active, last_seen, battery_level
FROM tracking_devices WHERE device_id = $1;
"#;

pub const SELECT_DEVICE_FOR_VEHICLE: &str = r#"
SELECT device_id, vehicle_id, driver_id, is_active, last_seen, battery_level
FROM tracking_devices WHERE vehicle_id = $1 AND is_active
ORDER BY last_seen DESC NULLS LAST LIMIT 1;
"#;

pub const SELECT_DEVICES: &str = r#"
SELECT device_id, vehicle_id, driver_id, is_active, last_seen, battery_level
FROM tracking_devices ORDER BY device_id;
"#;

pub const UPDATE_DEVICE_LAST_SEEN: &str = r#"
UPDATE tracking_devices
SET last_seen = $2,
    battery_level = COALESCE($3, battery_level)
WHERE device_id = $1;
"#;

pub const INSERT_LOCATION: &str = r#"
INSERT INTO vehicle_locations (
    id, device_id, vehicle_id, driver_id, latitude, longitude, altitude, accuracy,
    speed, bearing, timestamp, battery_level, is_moving, address, received_at
) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
ON CONFLICT (device_id, timestamp) DO NOTHING;
"#;

pub const SELECT_LOCATION_EXISTS: &str = r#"
SELECT EXISTS (SELECT 1 FROM vehicle_locations WHERE device_id = $1 AND timestamp = $2) AS found;
"#;

pub const SELECT_LATEST_LOCATION_FOR_DEVICE: &str = r#"
SELECT * FROM vehicle_locations WHERE device_id = $1 ORDER BY timestamp DESC LIMIT 1;
"#;

pub const SELECT_LATEST_LOCATION_FOR_VEHICLE: &str = r#"
SELECT * FROM vehicle_locations WHERE vehicle_id = $1 ORDER BY timestamp DESC LIMIT 1;
"#;

pub const SELECT_LATEST_LOCATION_PER_VEHICLE: &str = r#"
SELECT DISTINCT ON (vehicle_id) * FROM vehicle_locations
WHERE vehicle_id IS NOT NULL
ORDER BY vehicle_id, timestamp DESC;
"#;

pub const SELECT_LOCATION_HISTORY: &str = r#"
SELECT * FROM vehicle_locations WHERE device_id = $1 ORDER BY timestamp DESC LIMIT $2;
"#;

pub const SELECT_ACTIVE_GEOFENCES: &str = r#"
SELECT id, name, geofence_type, polygon, is_active, assignment_id
FROM geofence_areas WHERE is_active;
"#;

pub const INSERT_NOTIFICATION: &str = r#"
INSERT INTO dispatch_notifications (
    id, assignment_id, alert_id, notification_type, title, message, priority, is_read, target_user, created_at
) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10);
"#;

pub const UPDATE_NOTIFICATION_READ: &str = r#"
UPDATE dispatch_notifications SET is_read = true WHERE id = $1;
"#;

pub const SELECT_NOTIFICATIONS_FOR_USER: &str = r#"
SELECT * FROM dispatch_notifications
WHERE target_user IS NOT DISTINCT FROM $1
  AND (NOT $2 OR NOT is_read)
ORDER BY created_at DESC;
"#;

pub const SELECT_NOTIFICATIONS_FOR_ASSIGNMENT: &str = r#"
SELECT * FROM dispatch_notifications WHERE assignment_id = $1 ORDER BY created_at ASC;
"#;

pub const INSERT_ALERT: &str = r#"
INSERT INTO emergency_alerts (
    id, alert_type, location, assignment_id, vehicle_id, driver_id, message,
    is_resolved, resolved_at, resolved_by, created_at
) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11);
"#;

pub const SELECT_ALERT: &str = r#"
SELECT * FROM emergency_alerts WHERE id = $1;
"#;

pub const RESOLVE_ALERT: &str = r#"
UPDATE emergency_alerts
SET is_resolved = true,
    resolved_at = $3,
    resolved_by = $2
WHERE id = $1 AND NOT is_resolved
RETURNING *;
"#;

pub const SELECT_UNRESOLVED_ALERTS: &str = r#"
SELECT * FROM emergency_alerts WHERE NOT is_resolved ORDER BY created_at DESC;
"#;

pub const SELECT_BOOKING: &str = r#"
SELECT id, customer_name, customer_email, customer_phone,
       pickup_lat, pickup_lng, pickup_address,
       dropoff_lat, dropoff_lng, dropoff_address
FROM bookings WHERE id = $1;
"#;

pub const SELECT_DRIVER: &str = r#"
SELECT id, first_name, last_name, phone, is_available FROM drivers WHERE id = $1;
"#;

pub const SELECT_VEHICLE: &str = r#"
SELECT id, name, plate_number, is_available FROM vehicles WHERE id = $1;
"#;
