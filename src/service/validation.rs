//! Request body validation from column types and catalog rules.

use super::decimal::{decimal_text, Decimal};
use crate::config::{ColumnInfo, ColumnKind, ResolvedResource, ValidationRule};
use crate::error::{AppError, FieldErrors};
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

pub struct RequestValidator;

impl RequestValidator {
    /// Validate a full body for insert. Returns the writable values to store.
    pub fn validate_create(resource: &ResolvedResource, body: &Map<String, Value>) -> Result<Map<String, Value>, AppError> {
        Self::validate(resource, body, true)
    }

    /// Validate a partial body for update. Missing fields are left alone.
    pub fn validate_update(resource: &ResolvedResource, body: &Map<String, Value>) -> Result<Map<String, Value>, AppError> {
        Self::validate(resource, body, false)
    }

    fn validate(resource: &ResolvedResource, body: &Map<String, Value>, creating: bool) -> Result<Map<String, Value>, AppError> {
        let mut errors = FieldErrors::new();
        let mut values = Map::new();

        for key in body.keys() {
            match resource.column(key) {
                Some(col) if col.read_only => push(&mut errors, key, format!("{} is computed and cannot be set", key)),
                Some(_) => {}
                None => push(&mut errors, key, format!("{} is not a field of {}", key, resource.path_segment)),
            }
        }

        for col in resource.writable_columns() {
            let rule = resource.validation.get(&col.name);
            let required = rule.and_then(|r| r.required).unwrap_or(false);
            match body.get(&col.name) {
                None => {
                    if creating && (required || (!col.nullable && !col.has_default())) {
                        push(&mut errors, &col.name, format!("{} is required", col.name));
                    }
                }
                Some(Value::Null) => {
                    if required || !col.nullable {
                        push(&mut errors, &col.name, format!("{} is required", col.name));
                    } else {
                        values.insert(col.name.clone(), Value::Null);
                    }
                }
                Some(v) => {
                    let before = errors.len();
                    if let Err(msg) = check_type(col, v) {
                        push(&mut errors, &col.name, msg);
                    } else if let Some(rule) = rule {
                        for msg in check_rule(&col.name, v, rule) {
                            push(&mut errors, &col.name, msg);
                        }
                    }
                    if errors.len() == before {
                        values.insert(col.name.clone(), v.clone());
                    }
                }
            }
        }

        if errors.is_empty() {
            Ok(values)
        } else {
            Err(AppError::Validation(errors))
        }
    }
}

fn push(errors: &mut FieldErrors, field: &str, msg: String) {
    errors.entry(field.to_string()).or_default().push(msg);
}

fn parse_date(s: &str) -> bool {
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}

fn parse_timestamp(s: &str) -> bool {
    chrono::DateTime::parse_from_rfc3339(s).is_ok()
        || chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
        || chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f").is_ok()
}

fn numeric(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

/// Plain decimal within the column's declared precision and scale.
fn check_decimal(col: &ColumnInfo, v: &Value) -> Result<(), String> {
    let text = decimal_text(v).ok_or_else(|| format!("{} must be a number", col.name))?;
    let d = Decimal::parse(&text).ok_or_else(|| format!("{} must be a plain decimal number", col.name))?;
    if let Some(scale) = col.scale {
        if d.frac_digits() > scale as usize {
            return Err(format!("{} must have at most {} decimal places", col.name, scale));
        }
        if let Some(precision) = col.precision {
            let max_int = precision.saturating_sub(scale) as usize;
            if d.int_digits() > max_int {
                return Err(format!("{} must have at most {} integer digits", col.name, max_int));
            }
        }
    }
    Ok(())
}

fn check_type(col: &ColumnInfo, v: &Value) -> Result<(), String> {
    if col.kind == ColumnKind::Numeric {
        return check_decimal(col, v);
    }
    let ok = match col.kind {
        ColumnKind::Integer => v.as_i64().is_some(),
        ColumnKind::Numeric => true,
        ColumnKind::Text => v.is_string(),
        ColumnKind::Boolean => v.is_boolean(),
        ColumnKind::Date => v.as_str().map(parse_date).unwrap_or(false),
        ColumnKind::Timestamp => v.as_str().map(parse_timestamp).unwrap_or(false),
        ColumnKind::Uuid => v.as_str().map(|s| uuid::Uuid::parse_str(s).is_ok()).unwrap_or(false),
        ColumnKind::Json => true,
    };
    if ok {
        Ok(())
    } else {
        let expected = match col.kind {
            ColumnKind::Integer => "an integer",
            ColumnKind::Numeric => "a number",
            ColumnKind::Text => "a string",
            ColumnKind::Boolean => "a boolean",
            ColumnKind::Date => "a date (YYYY-MM-DD)",
            ColumnKind::Timestamp => "a timestamp",
            ColumnKind::Uuid => "a UUID",
            ColumnKind::Json => "JSON",
        };
        Err(format!("{} must be {}", col.name, expected))
    }
}

fn is_email(s: &str) -> bool {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").ok())
        .as_ref()
        .map(|re| re.is_match(s))
        .unwrap_or(false)
}

/// Rule checks for a non-null value that already has the right type.
fn check_rule(col: &str, v: &Value, rule: &ValidationRule) -> Vec<String> {
    let mut out = Vec::new();
    if let Some(format) = &rule.format {
        if let Some(s) = v.as_str() {
            let ok = match format.to_lowercase().as_str() {
                "email" => is_email(s),
                "uuid" => uuid::Uuid::parse_str(s).is_ok(),
                "date" => parse_date(s),
                _ => true,
            };
            if !ok {
                out.push(format!("{} must be a valid {}", col, format));
            }
        }
    }
    if let Some(s) = v.as_str() {
        let len = s.chars().count();
        if let Some(min) = rule.min_length {
            if len < min as usize {
                out.push(format!("{} must be at least {} characters", col, min));
            }
        }
        if let Some(max) = rule.max_length {
            if len > max as usize {
                out.push(format!("{} must be at most {} characters", col, max));
            }
        }
        if let Some(pattern) = &rule.pattern {
            match Regex::new(pattern) {
                Ok(re) if re.is_match(s) => {}
                Ok(_) => out.push(format!("{} does not match required pattern", col)),
                Err(_) => out.push(format!("invalid pattern for {}", col)),
            }
        }
    }
    if let Some(allowed) = &rule.allowed {
        if !allowed.iter().any(|a| value_eq(v, a)) {
            let shown: Vec<String> = allowed.iter().map(|a| a.to_string()).collect();
            out.push(format!("{} must be one of: {}", col, shown.join(", ")));
        }
    }
    if let Some(n) = numeric(v) {
        if let Some(min) = rule.minimum {
            if n < min {
                out.push(format!("{} must be at least {}", col, min));
            }
        }
        if let Some(max) = rule.maximum {
            if n > max {
                out.push(format!("{} must be at most {}", col, max));
            }
        }
    }
    out
}

fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::String(s), Value::String(t)) => s == t,
        (Value::Number(n), Value::Number(m)) => n.as_f64() == m.as_f64(),
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{builtin_catalog, resolve, ResolvedModel};
    use serde_json::json;

    fn model() -> ResolvedModel {
        resolve(&builtin_catalog().unwrap()).unwrap()
    }

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    fn field_errors(err: AppError) -> FieldErrors {
        match err {
            AppError::Validation(f) => f,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn valid_resident_passes_and_drops_managed_fields() {
        let m = model();
        let body = obj(json!({
            "id": 42,
            "created_at": "2020-01-01T00:00:00Z",
            "space_id": 1,
            "first_name": "Ada",
            "last_name": "Lovelace",
            "birthday": "1940-12-10",
            "gender": "female"
        }));
        let values = RequestValidator::validate_create(m.resource("resident").unwrap(), &body).unwrap();
        assert!(!values.contains_key("id"));
        assert!(!values.contains_key("created_at"));
        assert_eq!(values["first_name"], json!("Ada"));
    }

    #[test]
    fn errors_are_collected_per_field() {
        let m = model();
        let body = obj(json!({
            "space_id": "one",
            "first_name": "",
            "birthday": "10/12/1940",
            "gender": "other",
            "shoe_size": 9
        }));
        let errors = field_errors(RequestValidator::validate_create(m.resource("resident").unwrap(), &body).unwrap_err());
        assert!(errors["space_id"][0].contains("integer"));
        assert!(errors["first_name"][0].contains("at least 1"));
        assert!(errors["last_name"][0].contains("required"));
        assert!(errors["birthday"][0].contains("date"));
        assert!(errors["gender"][0].contains("one of"));
        assert!(errors.contains_key("shoe_size"));
    }

    #[test]
    fn update_only_checks_present_fields() {
        let m = model();
        let res = m.resource("resident").unwrap();
        let values = RequestValidator::validate_update(res, &obj(json!({"middle_name": null}))).unwrap();
        assert_eq!(values["middle_name"], Value::Null);
        let errors = field_errors(RequestValidator::validate_update(res, &obj(json!({"last_name": null}))).unwrap_err());
        assert!(errors.contains_key("last_name"));
    }

    #[test]
    fn numeric_strings_are_checked_against_minimum() {
        let m = model();
        let res = m.resource("resident_ledger_entry").unwrap();
        let base = json!({"ledger_id": 1, "kind": "charge", "date": "2024-01-01"});
        let mut ok = obj(base.clone());
        ok.insert("amount".into(), json!("12.50"));
        assert!(RequestValidator::validate_create(res, &ok).is_ok());
        let mut bad = obj(base);
        bad.insert("amount".into(), json!("-1"));
        let errors = field_errors(RequestValidator::validate_create(res, &bad).unwrap_err());
        assert!(errors["amount"][0].contains("at least 0"));
    }

    #[test]
    fn numeric_columns_take_plain_decimals_within_precision() {
        let m = model();
        let res = m.resource("resident_ledger_entry").unwrap();
        let amount_error = |amount: Value| {
            let mut body = obj(json!({"ledger_id": 1, "kind": "charge", "date": "2024-01-01"}));
            body.insert("amount".into(), amount);
            RequestValidator::validate_create(res, &body).err().map(|e| field_errors(e)["amount"][0].clone())
        };
        assert_eq!(amount_error(json!("999999999999.99")), None);
        assert_eq!(amount_error(json!(50.5)), None);
        assert!(amount_error(json!("1e2")).unwrap().contains("plain decimal"));
        assert!(amount_error(json!("inf")).unwrap().contains("plain decimal"));
        assert!(amount_error(json!("1.005")).unwrap().contains("2 decimal places"));
        assert!(amount_error(json!("92233720368547758.08")).unwrap().contains("12 integer digits"));
        assert!(amount_error(json!(true)).unwrap().contains("must be a number"));
    }

    #[test]
    fn computed_columns_cannot_be_set() {
        let m = model();
        let res = m.resource("resident_ledger").unwrap();
        let body = obj(json!({"resident_id": 1, "date_from": "2024-01-01", "balance": "999.99"}));
        let errors = field_errors(RequestValidator::validate_create(res, &body).unwrap_err());
        assert!(errors["balance"][0].contains("computed"));
        let errors = field_errors(RequestValidator::validate_update(res, &obj(json!({"total_charges": "5"}))).unwrap_err());
        assert!(errors.contains_key("total_charges"));
    }

    #[test]
    fn email_format_and_pattern() {
        let m = model();
        let res = m.resource("user").unwrap();
        let body = obj(json!({"space_id": 1, "role_id": 1, "username": "bad name!", "email": "nobody"}));
        let errors = field_errors(RequestValidator::validate_create(res, &body).unwrap_err());
        assert!(errors["username"][0].contains("pattern"));
        assert!(errors["email"][0].contains("valid email"));
    }
}
