//! Rotating photo carousel: slide timing and image loading.
//!
//! Timing is driven by the UI tick with an explicit clock so the rotation
//! rules stay testable. Slide images are fetched once at startup; a slide
//! whose image cannot be fetched or decoded still occupies its position
//! and is rendered as a placard by the UI.

use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use base64::Engine;
use image::DynamicImage;
use tracing::warn;

pub const ROTATE_EVERY: Duration = Duration::from_secs(5);

pub struct Carousel {
    index: usize,
    len: usize,
    last_advance: Instant,
    paused: bool,
}

impl Carousel {
    pub fn new(len: usize, now: Instant) -> Self {
        Carousel {
            index: 0,
            len,
            last_advance: now,
            paused: false,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn set_paused(&mut self, paused: bool, now: Instant) {
        // coming back to the screen should not fire an immediate flip
        if self.paused && !paused {
            self.last_advance = now;
        }
        self.paused = paused;
    }

    /// Advances when the slide has been up long enough. Returns whether
    /// the slide changed.
    pub fn tick(&mut self, now: Instant) -> bool {
        if self.paused || self.len < 2 {
            return false;
        }
        if now.duration_since(self.last_advance) >= ROTATE_EVERY {
            self.index = (self.index + 1) % self.len;
            self.last_advance = now;
            true
        } else {
            false
        }
    }

    pub fn next(&mut self, now: Instant) {
        if self.len > 0 {
            self.index = (self.index + 1) % self.len;
            self.last_advance = now;
        }
    }

    pub fn prev(&mut self, now: Instant) {
        if self.len > 0 {
            self.index = (self.index + self.len - 1) % self.len;
            self.last_advance = now;
        }
    }
}

/// Fetches and decodes every configured slide. Failures are logged and
/// leave a hole; the carousel keeps its slot count either way.
pub async fn load_slides(client: &reqwest::Client, urls: &[String]) -> Vec<Option<DynamicImage>> {
    let mut slides = Vec::with_capacity(urls.len());
    for url in urls {
        match fetch_image(client, url).await {
            Ok(image) => slides.push(Some(image)),
            Err(err) => {
                warn!("carousel: could not load {}: {:#}", url, err);
                slides.push(None);
            }
        }
    }
    slides
}

async fn fetch_image(client: &reqwest::Client, url: &str) -> Result<DynamicImage> {
    let bytes = if let Some(rest) = url.strip_prefix("data:") {
        decode_data_uri(rest)?
    } else {
        let response = client.get(url).send().await.context("image request failed")?;
        if !response.status().is_success() {
            bail!("image request returned HTTP {}", response.status());
        }
        response
            .bytes()
            .await
            .context("image body read failed")?
            .to_vec()
    };
    image::load_from_memory(&bytes).context("image decode failed")
}

fn decode_data_uri(rest: &str) -> Result<Vec<u8>> {
    // data:image/png;base64,<payload>
    let Some((meta, payload)) = rest.split_once(',') else {
        bail!("malformed data uri");
    };
    if !meta.ends_with(";base64") {
        bail!("unsupported data uri encoding");
    }
    base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .context("base64 decode failed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn tiny_png() -> Vec<u8> {
        let mut png = Vec::new();
        let rgb = image::RgbImage::from_pixel(1, 1, image::Rgb([10, 20, 30]));
        image::DynamicImage::ImageRgb8(rgb)
            .write_to(
                &mut std::io::Cursor::new(&mut png),
                image::ImageOutputFormat::Png,
            )
            .unwrap();
        png
    }

    #[test]
    fn rotates_every_five_seconds_with_wrap_around() {
        let t0 = Instant::now();
        let mut carousel = Carousel::new(3, t0);
        assert_eq!(carousel.index(), 0);

        assert!(!carousel.tick(t0 + Duration::from_secs(4)));
        assert!(carousel.tick(t0 + Duration::from_secs(5)));
        assert_eq!(carousel.index(), 1);

        assert!(carousel.tick(t0 + Duration::from_secs(10)));
        assert!(carousel.tick(t0 + Duration::from_secs(15)));
        assert_eq!(carousel.index(), 0);
    }

    #[test]
    fn manual_navigation_wraps_and_resets_the_timer() {
        let t0 = Instant::now();
        let mut carousel = Carousel::new(3, t0);

        carousel.prev(t0 + Duration::from_secs(4));
        assert_eq!(carousel.index(), 2);

        // the manual flip pushed the next automatic one out
        assert!(!carousel.tick(t0 + Duration::from_secs(8)));
        assert!(carousel.tick(t0 + Duration::from_secs(9)));
        assert_eq!(carousel.index(), 0);

        carousel.next(t0 + Duration::from_secs(9));
        assert_eq!(carousel.index(), 1);
    }

    #[test]
    fn pausing_stops_rotation_without_losing_the_slide() {
        let t0 = Instant::now();
        let mut carousel = Carousel::new(2, t0);

        carousel.set_paused(true, t0);
        assert!(!carousel.tick(t0 + Duration::from_secs(60)));
        assert_eq!(carousel.index(), 0);

        carousel.set_paused(false, t0 + Duration::from_secs(60));
        // no catch-up flip right after unpausing
        assert!(!carousel.tick(t0 + Duration::from_secs(61)));
        assert!(carousel.tick(t0 + Duration::from_secs(65)));
    }

    #[test]
    fn single_or_empty_slide_lists_never_rotate() {
        let t0 = Instant::now();
        let mut one = Carousel::new(1, t0);
        assert!(!one.tick(t0 + Duration::from_secs(30)));
        assert_eq!(one.index(), 0);

        let mut none = Carousel::new(0, t0);
        assert!(!none.tick(t0 + Duration::from_secs(30)));
        none.next(t0);
        none.prev(t0);
        assert!(none.is_empty());
        assert_eq!(none.index(), 0);
    }

    #[test]
    fn data_uris_decode_to_images() {
        let uri = format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(tiny_png())
        );
        let bytes = decode_data_uri(uri.strip_prefix("data:").unwrap()).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (1, 1));

        assert!(decode_data_uri("text/plain,hello").is_err());
        assert!(decode_data_uri("nocomma").is_err());
    }

    #[tokio::test]
    async fn slides_load_over_http_and_tolerate_failures() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(tiny_png()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/missing.png"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let client = reqwest::Client::new();

        let urls = vec![
            format!("{}/a.png", server.uri()),
            format!("{}/missing.png", server.uri()),
        ];
        let slides = load_slides(&client, &urls).await;

        assert_eq!(slides.len(), 2);
        assert!(slides[0].is_some());
        assert!(slides[1].is_none());
    }
}
