//! Deterministic, scriptable generation client.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::generation::{
    domain::{HexColor, ImageBytes, PaletteSpec},
    ports::{
        BaseImageRequest, GenerationClient, GenerationError, GenerationResult, RefineImageRequest,
    },
};

/// Local stand-in for the image generation service.
///
/// Images are short byte strings derived from the request, palettes are
/// named `palette-1..=count`. Failures and latency can be scripted per
/// operation, and call counts are recorded.
#[derive(Debug, Clone, Default)]
pub struct ScriptedGenerationClient {
    script: Arc<RwLock<Script>>,
    counters: Arc<Counters>,
}

#[derive(Debug, Default)]
struct Script {
    base_failure: Option<String>,
    palette_failure: Option<String>,
    palette_override: Option<u32>,
    variation_failures: HashMap<String, String>,
    latency: Option<Duration>,
    base_latency: Option<Duration>,
}

#[derive(Debug, Default)]
struct Counters {
    base_calls: AtomicUsize,
    refine_calls: AtomicUsize,
    palette_calls: AtomicUsize,
    render_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a Counters);

impl<'a> InFlight<'a> {
    fn enter(counters: &'a Counters) -> Self {
        let current = counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        counters.max_in_flight.fetch_max(current, Ordering::SeqCst);
        Self(counters)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedGenerationClient {
    /// Creates a client that succeeds instantly.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, edit: impl FnOnce(&mut Script)) {
        if let Ok(mut script) = self.script.write() {
            edit(&mut script);
        }
    }

    fn read<T>(&self, view: impl FnOnce(&Script) -> T) -> GenerationResult<T> {
        self.script
            .read()
            .map(|script| view(&script))
            .map_err(|err| GenerationError::transport(std::io::Error::other(err.to_string())))
    }

    /// Makes base generation and refinement fail with `message`.
    #[must_use]
    pub fn failing_base(self, message: impl Into<String>) -> Self {
        let text = message.into();
        self.update(|script| script.base_failure = Some(text));
        self
    }

    /// Makes palette generation fail with `message`.
    #[must_use]
    pub fn failing_palettes(self, message: impl Into<String>) -> Self {
        let text = message.into();
        self.update(|script| script.palette_failure = Some(text));
        self
    }

    /// Returns exactly `count` palettes regardless of the requested count.
    #[must_use]
    pub fn returning_palettes(self, count: u32) -> Self {
        self.update(|script| script.palette_override = Some(count));
        self
    }

    /// Makes rendering the palette called `palette` fail with `message`.
    #[must_use]
    pub fn failing_variation(self, palette: impl Into<String>, message: impl Into<String>) -> Self {
        let (name, text) = (palette.into(), message.into());
        self.update(|script| {
            script.variation_failures.insert(name, text);
        });
        self
    }

    /// Delays every call by `latency`.
    #[must_use]
    pub fn with_latency(self, latency: Duration) -> Self {
        self.update(|script| script.latency = Some(latency));
        self
    }

    /// Delays base generation and refinement by `latency`.
    #[must_use]
    pub fn with_base_latency(self, latency: Duration) -> Self {
        self.update(|script| script.base_latency = Some(latency));
        self
    }

    /// Returns the number of `generate_base` calls.
    #[must_use]
    pub fn base_calls(&self) -> usize {
        self.counters.base_calls.load(Ordering::SeqCst)
    }

    /// Returns the number of `refine_base` calls.
    #[must_use]
    pub fn refine_calls(&self) -> usize {
        self.counters.refine_calls.load(Ordering::SeqCst)
    }

    /// Returns the number of `generate_palettes` calls.
    #[must_use]
    pub fn palette_calls(&self) -> usize {
        self.counters.palette_calls.load(Ordering::SeqCst)
    }

    /// Returns the number of `render_variation` calls.
    #[must_use]
    pub fn render_calls(&self) -> usize {
        self.counters.render_calls.load(Ordering::SeqCst)
    }

    /// Returns the highest number of renders observed in flight at once.
    #[must_use]
    pub fn max_concurrent_renders(&self) -> usize {
        self.counters.max_in_flight.load(Ordering::SeqCst)
    }

    async fn pause(&self, specific: Option<Duration>) -> GenerationResult<()> {
        let latency = self.read(|script| script.latency)?;
        if let Some(delay) = specific.or(latency) {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn base_image(&self, seed: &str) -> GenerationResult<ImageBytes> {
        let (failure, base_latency) =
            self.read(|script| (script.base_failure.clone(), script.base_latency))?;
        self.pause(base_latency).await?;
        if let Some(message) = failure {
            return Err(GenerationError::upstream(message));
        }
        Ok(ImageBytes::from(format!("base:{seed}").into_bytes()))
    }
}

fn palette_color(index: u32, channel: u32) -> GenerationResult<HexColor> {
    let value = index.wrapping_mul(37).wrapping_add(channel.wrapping_mul(91)) & 0xFF;
    HexColor::parse(&format!("#{value:02X}{value:02X}{:02X}", 255 - value))
        .map_err(|err| GenerationError::InvalidResponse(err.to_string()))
}

#[async_trait]
impl GenerationClient for ScriptedGenerationClient {
    async fn generate_base(&self, request: &BaseImageRequest) -> GenerationResult<ImageBytes> {
        self.counters.base_calls.fetch_add(1, Ordering::SeqCst);
        self.base_image(&request.logo_description).await
    }

    async fn refine_base(&self, request: &RefineImageRequest) -> GenerationResult<ImageBytes> {
        self.counters.refine_calls.fetch_add(1, Ordering::SeqCst);
        self.base_image(&request.refinement_prompt).await
    }

    async fn generate_palettes(
        &self,
        theme: &str,
        count: u32,
    ) -> GenerationResult<Vec<PaletteSpec>> {
        self.counters.palette_calls.fetch_add(1, Ordering::SeqCst);
        self.pause(None).await?;
        let (failure, override_count) =
            self.read(|script| (script.palette_failure.clone(), script.palette_override))?;
        if let Some(message) = failure {
            return Err(GenerationError::upstream(message));
        }
        (1..=override_count.unwrap_or(count))
            .map(|index| {
                let colors = vec![palette_color(index, 0)?, palette_color(index, 1)?];
                PaletteSpec::new(format!("palette-{index}"), colors, format!("{theme} #{index}"))
                    .map_err(|err| GenerationError::InvalidResponse(err.to_string()))
            })
            .collect()
    }

    async fn render_variation(
        &self,
        base_image: &ImageBytes,
        palette: &PaletteSpec,
    ) -> GenerationResult<ImageBytes> {
        self.counters.render_calls.fetch_add(1, Ordering::SeqCst);
        let _in_flight = InFlight::enter(&self.counters);
        self.pause(None).await?;
        let failure = self.read(|script| script.variation_failures.get(palette.name()).cloned())?;
        if let Some(message) = failure {
            return Err(GenerationError::upstream(message));
        }
        let mut rendered = base_image.as_slice().to_vec();
        rendered.extend_from_slice(palette.name().as_bytes());
        Ok(ImageBytes::from(rendered))
    }
}
