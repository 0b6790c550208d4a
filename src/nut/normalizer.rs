use crate::models::{ChargingState, ConnectionState, RawTelemetry, UpsState};

/// Power factor used to estimate real power from the apparent nominal power
const POWER_FACTOR: f64 = 0.8;

/// Build the state of one UPS from its raw NUT variables.
///
/// Never fails: every field has a fallback for a missing or unparseable
/// variable. `fault` reflects the connection state, not the telemetry.
pub fn normalize(
    key: &str,
    name: &str,
    raw: &RawTelemetry,
    connection: ConnectionState,
    low_batt_threshold: f64,
) -> UpsState {
    let status = raw.get("ups.status");

    let active = raw
        .get("ups.load")
        .and_then(|v| parse_int(v))
        .map(|load| load > 0)
        .unwrap_or(false);

    let on_battery = status.map(|s| s.starts_with("OB")).unwrap_or(false);

    let temperature = raw.get("ups.temperature").and_then(|v| parse_float(v)).unwrap_or(-1.0);
    let battery_level = raw.get("battery.charge").and_then(|v| parse_float(v)).unwrap_or(0.0);

    let charging_state = status
        .map(|s| ChargingState::from_status(s))
        .unwrap_or(ChargingState::NotCharging);

    /* Gated on ups.status rather than ups.load, a missing load simply yields zeros */
    let mut power_consumption = 0;
    let mut power_consumption_level = 0;
    if status.is_some() && raw.contains_key("ups.power.nominal") {
        if let Some(load) = raw.get("ups.load").and_then(|v| parse_int(v)) {
            power_consumption_level = load;
            if let Some(nominal) = raw.get("ups.power.nominal").and_then(|v| parse_int(v)) {
                let watts = load as f64 * 0.01 * nominal as f64 * POWER_FACTOR;
                power_consumption = (watts + 0.5).floor() as i64;
            }
        }
    }

    UpsState {
        key: key.to_string(),
        name: name.to_string(),
        fault: !connection.is_connected(),
        active,
        on_battery,
        temperature,
        battery_level,
        charging_state,
        low_battery: battery_level < low_batt_threshold,
        power_consumption,
        power_consumption_level,
        manufacturer: first_non_empty(raw, &["device.mfr", "ups.vendorid"], "No Manufacturer"),
        model: first_non_empty(raw, &["device.model", "ups.productid"], "No Model"),
        serial_number: first_non_empty(raw, &["ups.serial"], "No Serial"),
        firmware_revision: first_non_empty(raw, &["ups.firmware"], "No Data"),
    }
}

fn first_non_empty(raw: &RawTelemetry, keys: &[&str], fallback: &str) -> String {
    keys.iter()
        .filter_map(|k| raw.get(*k))
        .find(|v| !v.is_empty())
        .map(|v| v.as_str())
        .unwrap_or(fallback)
        .trim()
        .to_string()
}

/// Leading integer of a value, so "45.7" reads as 45 and "12 %" as 12
pub fn parse_int(value: &str) -> Option<i64> {
    let s = value.trim_start();
    let sign_len = if s.starts_with('-') || s.starts_with('+') { 1 } else { 0 };
    let digits = s[sign_len..].bytes().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    s[..sign_len + digits].parse::<i64>().ok()
}

/// Leading decimal number of a value, trailing garbage is ignored
pub fn parse_float(value: &str) -> Option<f64> {
    let s = value.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;

    if end < bytes.len() && (bytes[end] == b'-' || bytes[end] == b'+') {
        end += 1;
    }

    let int_digits = bytes[end..].iter().take_while(|b| b.is_ascii_digit()).count();
    end += int_digits;

    let mut frac_digits = 0;
    if end < bytes.len() && bytes[end] == b'.' {
        frac_digits = bytes[end + 1..].iter().take_while(|b| b.is_ascii_digit()).count();
        if int_digits > 0 || frac_digits > 0 {
            end += 1 + frac_digits;
        }
    }

    if int_digits == 0 && frac_digits == 0 {
        return None;
    }

    /* Exponent only counts when digits follow it */
    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut exp_end = end + 1;
        if exp_end < bytes.len() && (bytes[exp_end] == b'-' || bytes[exp_end] == b'+') {
            exp_end += 1;
        }
        let exp_digits = bytes[exp_end..].iter().take_while(|b| b.is_ascii_digit()).count();
        if exp_digits > 0 {
            end = exp_end + exp_digits;
        }
    }

    s[..end].parse::<f64>().ok()
}
