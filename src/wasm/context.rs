//! `WebGLRenderingContext` behind the [`GlContext`] seam.

use wasm_bindgen::{JsCast, JsValue};
use web_sys::{
    Document, HtmlCanvasElement, WebGlContextAttributes, WebGlPowerPreference,
    WebGlRenderingContext as GL, WebglDebugRendererInfo, WebglLoseContext,
};

use crate::error::{GlError, Result};
use crate::platform::{ContextProvider, GlContext, IntParam, StringParam};
use crate::quality::{ContextAttributes, PowerPreference};

const CONTEXT_IDS: [&str; 2] = ["webgl", "experimental-webgl"];

pub(crate) fn js_error(err: &JsValue) -> String {
    err.as_string().unwrap_or_else(|| format!("{err:?}"))
}

fn web_attributes(attributes: &ContextAttributes) -> WebGlContextAttributes {
    let web = WebGlContextAttributes::new();
    web.set_alpha(attributes.alpha);
    web.set_antialias(attributes.antialias);
    web.set_power_preference(match attributes.power_preference {
        PowerPreference::Default => WebGlPowerPreference::Default,
        PowerPreference::HighPerformance => WebGlPowerPreference::HighPerformance,
        PowerPreference::LowPower => WebGlPowerPreference::LowPower,
    });
    web.set_fail_if_major_performance_caveat(attributes.fail_if_major_performance_caveat);
    web.set_preserve_drawing_buffer(attributes.preserve_drawing_buffer);
    web
}

pub(crate) struct WebContext {
    gl: GL,
    canvas: HtmlCanvasElement,
    // Extensions are fetched up front: `getExtension` returns null once the
    // context is lost, which is exactly when `restoreContext` is needed.
    lose_ext: Option<WebglLoseContext>,
    debug_ext: bool,
    /// Probe contexts own a detached canvas and release it on drop.
    detached: bool,
}

impl WebContext {
    pub(crate) fn gl(&self) -> &GL {
        &self.gl
    }

    fn debug_parameter(&self, pname: u32) -> Option<String> {
        if !self.debug_ext {
            return None;
        }
        self.gl.get_parameter(pname).ok()?.as_string()
    }

    /// Maps the sticky GL error flag to a result. `CONTEXT_LOST_WEBGL` is left
    /// to the loss event.
    fn check(&self, what: &str) -> Result<()> {
        match self.gl.get_error() {
            GL::NO_ERROR | GL::CONTEXT_LOST_WEBGL => Ok(()),
            code => Err(GlError::Query(format!("{what}: GL error {code:#06x}"))),
        }
    }
}

impl Drop for WebContext {
    fn drop(&mut self) {
        if self.detached {
            if let Some(ext) = &self.lose_ext {
                ext.lose_context();
            }
            self.canvas.remove();
        }
    }
}

/// Asks `canvas` for a WebGL context, trying the legacy id second.
pub(crate) fn acquire(
    canvas: &HtmlCanvasElement,
    attributes: Option<&ContextAttributes>,
    detached: bool,
) -> Result<Option<WebContext>> {
    let options: JsValue = match attributes {
        Some(attributes) => web_attributes(attributes).into(),
        None => JsValue::UNDEFINED,
    };
    for id in CONTEXT_IDS {
        let context = canvas
            .get_context_with_context_options(id, &options)
            .map_err(|err| GlError::Acquire(js_error(&err)))?;
        let Some(context) = context else {
            continue;
        };
        let gl = context
            .dyn_into::<GL>()
            .map_err(|_| GlError::Acquire(format!("`{id}` returned a non-WebGL context")))?;
        let lose_ext = gl
            .get_extension("WEBGL_lose_context")
            .ok()
            .flatten()
            .map(JsCast::unchecked_into::<WebglLoseContext>);
        let debug_ext = matches!(gl.get_extension("WEBGL_debug_renderer_info"), Ok(Some(_)));
        return Ok(Some(WebContext {
            gl,
            canvas: canvas.clone(),
            lose_ext,
            debug_ext,
            detached,
        }));
    }
    Ok(None)
}

impl GlContext for WebContext {
    fn is_context_lost(&self) -> bool {
        self.gl.is_context_lost()
    }

    fn string_parameter(&self, param: StringParam) -> Result<String> {
        let pname = match param {
            StringParam::Version => GL::VERSION,
            StringParam::Vendor => GL::VENDOR,
            StringParam::Renderer => GL::RENDERER,
            StringParam::ShadingLanguageVersion => GL::SHADING_LANGUAGE_VERSION,
        };
        self.gl
            .get_parameter(pname)
            .map_err(|err| GlError::Query(js_error(&err)))?
            .as_string()
            .ok_or_else(|| GlError::Query(format!("{param:?} is not available")))
    }

    fn int_parameter(&self, param: IntParam) -> Result<i32> {
        let pname = match param {
            IntParam::MaxTextureSize => GL::MAX_TEXTURE_SIZE,
            IntParam::MaxVertexAttribs => GL::MAX_VERTEX_ATTRIBS,
            IntParam::MaxTextureImageUnits => GL::MAX_TEXTURE_IMAGE_UNITS,
        };
        let value = self
            .gl
            .get_parameter(pname)
            .map_err(|err| GlError::Query(js_error(&err)))?
            .as_f64()
            .ok_or_else(|| GlError::Query(format!("{param:?} is not available")))?;
        Ok(value as i32)
    }

    fn max_viewport_dims(&self) -> Result<[i32; 2]> {
        let dims = self
            .gl
            .get_parameter(GL::MAX_VIEWPORT_DIMS)
            .map_err(|err| GlError::Query(js_error(&err)))?
            .dyn_into::<js_sys::Int32Array>()
            .map_err(|_| GlError::Query("MAX_VIEWPORT_DIMS is not available".into()))?
            .to_vec();
        match dims.as_slice() {
            [width, height, ..] => Ok([*width, *height]),
            _ => Err(GlError::Query("MAX_VIEWPORT_DIMS is malformed".into())),
        }
    }

    fn unmasked_renderer(&self) -> Option<String> {
        self.debug_parameter(WebglDebugRendererInfo::UNMASKED_RENDERER_WEBGL)
    }

    fn unmasked_vendor(&self) -> Option<String> {
        self.debug_parameter(WebglDebugRendererInfo::UNMASKED_VENDOR_WEBGL)
    }

    fn supported_extensions(&self) -> Vec<String> {
        self.gl
            .get_supported_extensions()
            .map(|list| list.iter().filter_map(|name| name.as_string()).collect())
            .unwrap_or_default()
    }

    fn unbind_texture_unit(&self, unit: u32) -> Result<()> {
        self.gl.active_texture(GL::TEXTURE0 + unit);
        self.gl.bind_texture(GL::TEXTURE_2D, None);
        self.gl.bind_texture(GL::TEXTURE_CUBE_MAP, None);
        self.check("unbind texture")
    }

    fn unbind_buffers(&self) -> Result<()> {
        self.gl.bind_buffer(GL::ARRAY_BUFFER, None);
        self.gl.bind_buffer(GL::ELEMENT_ARRAY_BUFFER, None);
        self.check("unbind buffers")
    }

    fn unbind_framebuffers(&self) -> Result<()> {
        self.gl.bind_framebuffer(GL::FRAMEBUFFER, None);
        self.gl.bind_renderbuffer(GL::RENDERBUFFER, None);
        self.check("unbind framebuffers")
    }

    fn clear_program(&self) -> Result<()> {
        self.gl.use_program(None);
        self.check("clear program")
    }

    fn lose_context(&self) -> bool {
        match &self.lose_ext {
            Some(ext) => {
                ext.lose_context();
                true
            }
            None => false,
        }
    }

    fn restore_context(&self) -> bool {
        match &self.lose_ext {
            Some(ext) => {
                ext.restore_context();
                true
            }
            None => false,
        }
    }
}

/// Creates detached canvases for probing and diagnostics.
#[derive(Debug, Clone)]
pub(crate) struct OffscreenProvider {
    document: Document,
}

impl OffscreenProvider {
    pub(crate) fn from_window() -> Result<Self> {
        let document = web_sys::window()
            .and_then(|window| window.document())
            .ok_or_else(|| GlError::Acquire("no document".into()))?;
        Ok(Self { document })
    }
}

impl ContextProvider for OffscreenProvider {
    type Context = WebContext;

    fn acquire_offscreen(&self) -> Result<Option<WebContext>> {
        let canvas = self
            .document
            .create_element("canvas")
            .map_err(|err| GlError::Acquire(js_error(&err)))?
            .dyn_into::<HtmlCanvasElement>()
            .map_err(|_| GlError::Acquire("created element is not a canvas".into()))?;
        acquire(&canvas, None, true)
    }
}
