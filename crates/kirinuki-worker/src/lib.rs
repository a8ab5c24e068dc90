//! Web worker entry point for kirinuki cutout processing.
//!
//! This crate compiles to a standalone WASM module that runs inside a
//! `Worker`. It receives an RGBA `ImageData` buffer and a
//! `PipelineConfig` via `postMessage`, runs the segmentation pipeline,
//! and posts the cutout back.
//!
//! Pixel buffers travel as raw `Uint8Array`s to avoid JSON-encoding
//! megabytes of pixel data as number arrays. Only the small diagnostics
//! and error payloads are sent as JSON strings.
//!
//! Running the pipeline in a worker keeps the browser's main thread
//! free for UI updates while a batch of images is processed.

use std::time::Duration;

use kirinuki_pipeline::diagnostics::{Clock, PipelineDiagnostics};
use kirinuki_pipeline::{PipelineConfig, PipelineError, StagedResult};
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;

/// [`Clock`] backed by `performance.now()` through `web-time`.
struct WebClock;

impl Clock for WebClock {
    type Instant = web_time::Instant;

    fn now(&self) -> web_time::Instant {
        web_time::Instant::now()
    }

    fn elapsed(&self, since: &web_time::Instant) -> Duration {
        since.elapsed()
    }
}

/// A decoded request from the main thread.
struct Request {
    pixels: Vec<u8>,
    width: u32,
    height: u32,
    config_json: String,
    generation: f64,
}

/// Message protocol: the main thread sends a JS object with:
/// - `pixels`: `Uint8Array` containing RGBA bytes (`ImageData.data`)
/// - `width`, `height`: `number` image dimensions
/// - `configJson`: `String` containing JSON-serialized `PipelineConfig`
/// - `generation`: `number` generation counter (passed through to response)
///
/// On success the worker responds with a JS object containing:
/// - `generation`: `number` matching the request generation
/// - `ok`: `true`
/// - `width`, `height`: `number`
/// - `pixels`: `Uint8Array` with the cutout RGBA bytes
/// - `maskPixels`: `Uint8Array` with the final cleaned mask
/// - `diagnosticsJson`: `String` with per-stage timings and counts
///
/// On error the worker responds with:
/// - `generation`: `number`
/// - `ok`: `false`
/// - `errorJson`: `String` with the JSON-serialized `PipelineError`
///
/// # Worker entry point
///
/// Called automatically when the WASM module is instantiated in the
/// worker context.
#[wasm_bindgen(start)]
pub fn worker_main() {
    console_error_panic_hook::set_once();

    let global: web_sys::DedicatedWorkerGlobalScope = js_sys::global()
        .dyn_into()
        .expect_throw("not running in a DedicatedWorkerGlobalScope");

    let onmessage =
        Closure::<dyn FnMut(web_sys::MessageEvent)>::new(move |event: web_sys::MessageEvent| {
            handle_message(&event);
        });
    global.set_onmessage(Some(onmessage.as_ref().unchecked_ref()));
    onmessage.forget(); // leaked: lives for the worker lifetime
}

/// Read a named field from a JS object.
fn field(data: &JsValue, name: &str) -> Result<JsValue, String> {
    js_sys::Reflect::get(data, &JsValue::from_str(name)).map_err(|_| format!("missing {name} field"))
}

/// Read a non-negative integer field that fits in `u32`.
fn dimension_field(data: &JsValue, name: &str) -> Result<u32, String> {
    let value = field(data, name)?
        .as_f64()
        .ok_or_else(|| format!("{name} is not a number"))?;
    if value.fract() != 0.0 || !(0.0..=f64::from(u32::MAX)).contains(&value) {
        return Err(format!("{name} = {value} is not a valid dimension"));
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Ok(value as u32)
}

/// Extract the request fields from the message payload.
fn parse_request(data: &JsValue) -> Result<Request, String> {
    let pixels: js_sys::Uint8Array = field(data, "pixels")?
        .dyn_into()
        .map_err(|_| "pixels is not a Uint8Array".to_string())?;
    let config_json = field(data, "configJson")?
        .as_string()
        .ok_or_else(|| "configJson is not a string".to_string())?;
    let generation = field(data, "generation")?
        .as_f64()
        .ok_or_else(|| "generation is not a number".to_string())?;

    Ok(Request {
        pixels: pixels.to_vec(),
        width: dimension_field(data, "width")?,
        height: dimension_field(data, "height")?,
        config_json,
        generation,
    })
}

/// Handle an incoming message from the main thread.
///
/// Parses the request and config, runs the pipeline, and posts the
/// result back. Malformed requests are answered with an
/// `UnsupportedConfiguration` error.
fn handle_message(event: &web_sys::MessageEvent) {
    let data = event.data();
    let generation = field(&data, "generation")
        .ok()
        .and_then(|g| g.as_f64())
        .unwrap_or(f64::NAN);

    let request = match parse_request(&data) {
        Ok(r) => r,
        Err(msg) => {
            post_error(generation, &PipelineError::UnsupportedConfiguration(msg));
            return;
        }
    };

    let config: PipelineConfig = match serde_json::from_str(&request.config_json) {
        Ok(c) => c,
        Err(e) => {
            post_error(
                request.generation,
                &PipelineError::UnsupportedConfiguration(format!("failed to parse config: {e}")),
            );
            return;
        }
    };

    // Synchronous: blocks this worker thread only.
    let outcome = kirinuki_pipeline::diagnostics::process_staged_with_diagnostics(
        &request.pixels,
        request.width,
        request.height,
        &config,
        &WebClock,
    );

    match outcome {
        Ok((staged, diagnostics)) => post_success(request.generation, &staged, &diagnostics),
        Err(e) => post_error(request.generation, &e),
    }
}

/// Post a successful pipeline result back to the main thread.
fn post_success(generation: f64, staged: &StagedResult, diagnostics: &PipelineDiagnostics) {
    let diagnostics_json = match serde_json::to_string(diagnostics) {
        Ok(json) => json,
        Err(e) => {
            post_error(
                generation,
                &PipelineError::UnsupportedConfiguration(format!(
                    "failed to serialize diagnostics: {e}"
                )),
            );
            return;
        }
    };

    let response = js_sys::Object::new();
    let set = |key: &str, val: &JsValue| {
        js_sys::Reflect::set(&response, &JsValue::from_str(key), val)
            .expect_throw("failed to set response field");
    };

    set("generation", &JsValue::from_f64(generation));
    set("ok", &JsValue::from_bool(true));
    set(
        "width",
        &JsValue::from_f64(f64::from(staged.dimensions.width)),
    );
    set(
        "height",
        &JsValue::from_f64(f64::from(staged.dimensions.height)),
    );
    set(
        "pixels",
        &js_sys::Uint8Array::from(staged.final_image().as_raw().as_slice()),
    );
    set(
        "maskPixels",
        &js_sys::Uint8Array::from(staged.cleaned.as_raw().as_slice()),
    );
    set("diagnosticsJson", &JsValue::from_str(&diagnostics_json));

    let global: web_sys::DedicatedWorkerGlobalScope = js_sys::global()
        .dyn_into()
        .expect_throw("not in worker scope");
    global
        .post_message(&response)
        .expect_throw("failed to postMessage");
}

/// Post an error response back to the main thread.
fn post_error(generation: f64, error: &PipelineError) {
    let error_json = serde_json::to_string(error)
        .unwrap_or_else(|ser_err| format!("\"serialization error: {ser_err}\""));

    let response = js_sys::Object::new();
    let _ = js_sys::Reflect::set(
        &response,
        &JsValue::from_str("generation"),
        &JsValue::from_f64(generation),
    );
    let _ = js_sys::Reflect::set(
        &response,
        &JsValue::from_str("ok"),
        &JsValue::from_bool(false),
    );
    let _ = js_sys::Reflect::set(
        &response,
        &JsValue::from_str("errorJson"),
        &JsValue::from_str(&error_json),
    );

    if let Ok(global) = js_sys::global().dyn_into::<web_sys::DedicatedWorkerGlobalScope>() {
        let _ = global.post_message(&response);
    }
}
