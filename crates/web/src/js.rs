//! Conversions between protocol fields and JavaScript arrays.

use js_sys::Array;
use kiln_protocol::{Field, Message};
use wasm_bindgen::JsValue;

/// Numbers and strings become typed fields; anything else is a handle.
pub fn fields_from_array(array: &Array) -> Vec<Field<JsValue>> {
    array
        .iter()
        .map(|value| {
            if let Some(n) = value.as_f64() {
                Field::Number(n)
            } else if let Some(s) = value.as_string() {
                Field::Text(s)
            } else {
                Field::Handle(value)
            }
        })
        .collect()
}

pub fn array_from_fields(fields: Vec<Field<JsValue>>) -> Array {
    fields
        .into_iter()
        .map(|field| match field {
            Field::Number(n) => JsValue::from_f64(n),
            Field::Text(s) => JsValue::from_str(&s),
            Field::Handle(h) => h,
        })
        .collect()
}

/// Decode message data; non-array data decodes to nothing.
pub fn decode(data: &JsValue) -> Option<Message<JsValue>> {
    if !Array::is_array(data) {
        return None;
    }
    Message::decode(fields_from_array(&Array::from(data)))
}

pub fn encode(message: Message<JsValue>) -> Array {
    array_from_fields(message.encode())
}
