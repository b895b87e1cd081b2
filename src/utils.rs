use js_sys::Reflect;
use wasm_bindgen::JsValue;

pub fn get_attribute<T>(
    object: &JsValue,
    field_name: &str,
    mapper: impl Fn(&JsValue) -> Option<T>,
) -> Result<Option<T>, JsValue> {
    Reflect::get(object, &JsValue::from_str(field_name)).map(|x| mapper(&x))
}

pub fn set_attribute(
    object: &JsValue,
    field_name: &str,
    value: f64,
) -> Result<bool, JsValue> {
    Reflect::set(
        object,
        &JsValue::from_str(field_name),
        &JsValue::from_f64(value),
    )
}

/// Converts a floating thread estimate to a thread count, treating
/// non-finite and negative estimates as zero.
pub fn to_threads(estimate: f64) -> u32 {
    if estimate.is_finite() && 0. < estimate {
        estimate.min(u32::MAX as f64) as u32
    }
    else {
        0
    }
}
