#![cfg(target_arch = "wasm32")]

use gl_guard_wasm::wasm::{mount_surface, simulate_webgl_context_loss, webgl_diagnostics, webgl_status};
use js_sys::Reflect;
use wasm_bindgen::{JsCast, JsValue};
use wasm_bindgen_test::*;
use web_sys::{HtmlCanvasElement, HtmlElement};

wasm_bindgen_test_configure!(run_in_browser);

fn field(object: &JsValue, name: &str) -> JsValue {
    Reflect::get(object, &JsValue::from_str(name)).unwrap()
}

fn add_canvas(id: &str) -> HtmlCanvasElement {
    let document = web_sys::window().unwrap().document().unwrap();
    let canvas = document
        .create_element("canvas")
        .unwrap()
        .dyn_into::<HtmlCanvasElement>()
        .unwrap();
    canvas.set_id(id);
    canvas.style().set_property("width", "320px").unwrap();
    canvas.style().set_property("height", "180px").unwrap();
    document.body().unwrap().append_child(&canvas).unwrap();
    canvas
}

#[wasm_bindgen_test]
fn status_is_consistent() {
    let status = webgl_status().unwrap();
    let supported = field(&status, "isSupported").as_bool().unwrap();
    let lost = field(&status, "isContextLost").as_bool().unwrap();
    let can_render = field(&status, "canRender").as_bool().unwrap();
    assert_eq!(can_render, supported && !lost);
}

#[wasm_bindgen_test]
fn diagnostics_are_complete_or_explain_why() {
    let info = webgl_diagnostics().unwrap();
    if field(&info, "error").is_string() {
        assert!(field(&info, "version").is_undefined());
    } else {
        assert!(field(&info, "version").is_string());
        assert!(field(&info, "maxTextureSize").as_f64().unwrap() > 0.0);
        assert!(js_sys::Array::is_array(&field(&info, "extensions")));
    }
}

#[wasm_bindgen_test]
fn mounted_surface_shows_exactly_one_visual() {
    let canvas = add_canvas("surface-under-test");
    let mut surface = mount_surface("surface-under-test", None).unwrap();

    let fallback = canvas
        .next_element_sibling()
        .unwrap()
        .dyn_into::<HtmlElement>()
        .unwrap();
    assert_eq!(fallback.class_name(), "gl-fallback");
    assert_ne!(canvas.hidden(), fallback.hidden());

    let can_render = field(&webgl_status().unwrap(), "canRender").as_bool().unwrap();
    let mode = surface.mode().unwrap().as_string().unwrap();
    if can_render {
        assert_eq!(mode, "Rendering");
        assert!(!canvas.hidden());
    } else {
        assert_eq!(mode, "FallbackPermanent");
        assert!(canvas.hidden());
    }
    assert_eq!(surface.recovery_attempts(), 0);

    surface.unmount();
    assert!(canvas.hidden());
    assert!(!fallback.hidden());
    canvas.remove();
    fallback.remove();
}

#[wasm_bindgen_test]
fn missing_canvas_is_an_error() {
    assert!(mount_surface("no-such-canvas", None).is_err());
}

#[wasm_bindgen_test]
fn simulated_loss_needs_a_live_surface() {
    // Nothing is mounted in the test page.
    assert!(!simulate_webgl_context_loss());
}
