//! Payload converters.
//!
//! A [`Converter`] turns the [`ResponseBody`] of a raw response into the typed
//! value a handle was declared with. Converters fail only with a
//! [`ConversionError`]; the dispatch handles route that error (and a
//! converter panic) to the registered callback's failure method.

use std::any::Any;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};

use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::{
    // ---
    ConversionError,
    Error,
    RawResponse,
    ResponseBody,
    Response,
    Result,
};

/// Converts a raw response body into `T`.
pub trait Converter<T>: Send + Sync {
    /// Convert `body`.
    fn convert(&self, body: &ResponseBody) -> std::result::Result<T, ConversionError>;
}

impl<T, F> Converter<T> for F
where
    F: Fn(&ResponseBody) -> std::result::Result<T, ConversionError> + Send + Sync,
{
    fn convert(&self, body: &ResponseBody) -> std::result::Result<T, ConversionError> {
        self(body)
    }
}

/// Decodes the payload as JSON with `serde_json`.
pub struct JsonConverter<T> {
    _phantom: PhantomData<fn() -> T>,
}

impl<T> JsonConverter<T> {
    /// Create a JSON converter.
    pub fn new() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<T> Default for JsonConverter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> Converter<T> for JsonConverter<T> {
    fn convert(&self, body: &ResponseBody) -> std::result::Result<T, ConversionError> {
        // ---
        serde_json::from_slice(&body.payload).map_err(ConversionError::from)
    }
}

/// Decodes the payload as UTF-8 text.
#[derive(Clone, Copy, Debug, Default)]
pub struct StringConverter;

impl Converter<String> for StringConverter {
    fn convert(&self, body: &ResponseBody) -> std::result::Result<String, ConversionError> {
        // ---
        String::from_utf8(body.payload.to_vec())
            .map_err(|err| ConversionError::new(format!("utf-8: {err}")))
    }
}

/// Hands the payload through untouched.
#[derive(Clone, Copy, Debug, Default)]
pub struct BytesConverter;

impl Converter<Bytes> for BytesConverter {
    fn convert(&self, body: &ResponseBody) -> std::result::Result<Bytes, ConversionError> {
        Ok(body.payload.clone())
    }
}

/// Hands the whole response body (topic and payload) through.
#[derive(Clone, Copy, Debug, Default)]
pub struct BodyConverter;

impl Converter<ResponseBody> for BodyConverter {
    fn convert(&self, body: &ResponseBody) -> std::result::Result<ResponseBody, ConversionError> {
        Ok(body.clone())
    }
}

/// Ignores the payload; useful when only the arrival matters.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnitConverter;

impl Converter<()> for UnitConverter {
    fn convert(&self, _body: &ResponseBody) -> std::result::Result<(), ConversionError> {
        Ok(())
    }
}

/// Run `converter` over `raw` and wrap the outcome as a typed response.
///
/// A panicking converter is reported as a conversion fault so it never
/// unwinds through the delivery thread.
pub(crate) fn convert_response<T>(
    converter: &dyn Converter<T>,
    raw: RawResponse,
) -> Result<Response<T>> {
    // ---
    let converted = panic::catch_unwind(AssertUnwindSafe(|| converter.convert(&raw.body)));

    match converted {
        Ok(Ok(body)) => Ok(Response::success(body, raw)),
        Ok(Err(err)) => Err(Error::Conversion(err)),
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            crate::log_error!("converter panicked on {}: {message}", raw.body.topic);
            Err(Error::Conversion(ConversionError::new(format!(
                "converter panicked: {message}"
            ))))
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    // ---
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
