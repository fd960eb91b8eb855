use scraper::{ElementRef, Html};
use tracing::debug;
use url::Url;

use crate::models::{CandidateImage, ImageFormat};

/// Extensions of formats the model API never gets from us.
const UNSUPPORTED_EXTENSIONS: &[&str] = &["svg", "webp", "bmp", "ico", "tif", "tiff", "avif", "heic"];

/// Raw `<img>` attributes as they appear in the markup.
#[derive(Debug, Clone)]
struct ImgTag {
    src: String,
    width: Option<u32>,
    height: Option<u32>,
    alt: Option<String>,
    caption: Option<String>,
}

/// Finds candidate chart images in a page.
#[derive(Debug, Clone)]
pub struct ImageLocator {
    min_area: u64,
}

impl ImageLocator {
    pub fn new(min_area: u64) -> Self {
        Self { min_area }
    }

    /// Parses `html` once; resolution and filtering happen lazily on iteration.
    pub fn locate(&self, html: &str, base_url: &Url) -> Candidates {
        let document = Html::parse_document(html);
        let tags: Vec<ImgTag> = document
            .root_element()
            .descendants()
            .filter_map(ElementRef::wrap)
            .filter(|el| el.value().name() == "img")
            .filter_map(read_img_tag)
            .collect();

        debug!(stage = "locate", base = %base_url, img_tags = tags.len(), "parsed page markup");
        Candidates {
            base: base_url.clone(),
            min_area: self.min_area,
            tags,
        }
    }
}

/// The images of one page, in document order. Iterating is restartable.
#[derive(Debug, Clone)]
pub struct Candidates {
    base: Url,
    min_area: u64,
    tags: Vec<ImgTag>,
}

impl Candidates {
    pub fn iter(&self) -> impl Iterator<Item = CandidateImage> + '_ {
        self.tags.iter().filter_map(move |tag| self.qualify(tag))
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Largest declared area first; equal areas keep document order.
    pub fn ranked(&self) -> Vec<CandidateImage> {
        let mut ranked: Vec<CandidateImage> = self.iter().collect();
        // sort_by is stable, so ties keep document order
        ranked.sort_by(|a, b| b.area().unwrap_or(0).cmp(&a.area().unwrap_or(0)));
        ranked
    }

    pub fn best(&self) -> Option<CandidateImage> {
        self.ranked().into_iter().next()
    }

    fn qualify(&self, tag: &ImgTag) -> Option<CandidateImage> {
        let src = tag.src.trim();
        if src.is_empty() || is_data_url(src) || src.chars().any(char::is_whitespace) {
            return None;
        }

        let url = self.base.join(src).ok()?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return None;
        }

        let extension = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| ext.to_ascii_lowercase());
        if extension
            .as_deref()
            .is_some_and(|ext| UNSUPPORTED_EXTENSIONS.contains(&ext))
        {
            return None;
        }

        let size_hint = tag.width.zip(tag.height);
        if let Some((w, h)) = size_hint {
            if u64::from(w) * u64::from(h) < self.min_area {
                return None;
            }
        }

        Some(CandidateImage {
            mime_type: extension.as_deref().and_then(ImageFormat::from_extension),
            url,
            size_hint,
            alt_text: tag.alt.clone(),
            caption: tag.caption.clone(),
        })
    }
}

impl<'a> IntoIterator for &'a Candidates {
    type Item = CandidateImage;
    type IntoIter = Box<dyn Iterator<Item = CandidateImage> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

fn read_img_tag(el: ElementRef<'_>) -> Option<ImgTag> {
    let attrs = el.value();
    // lazy-loading markup keeps a blank or data: placeholder in src
    let src = attrs
        .attr("src")
        .filter(|s| !s.trim().is_empty() && !is_data_url(s))
        .or_else(|| attrs.attr("data-src").filter(|s| !s.trim().is_empty()))
        .or_else(|| attrs.attr("src"))?;

    Some(ImgTag {
        src: src.to_string(),
        width: attrs.attr("width").and_then(parse_dimension),
        height: attrs.attr("height").and_then(parse_dimension),
        alt: attrs.attr("alt").map(normalize_text).filter(|s| !s.is_empty()),
        caption: find_caption(el),
    })
}

/// Accepts `"800"` and `"800px"`; percentages and garbage are ignored.
fn parse_dimension(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    let digits = raw.strip_suffix("px").unwrap_or(raw).trim();
    digits.parse().ok()
}

/// `<figcaption>` of the innermost enclosing `<figure>` that has one.
fn find_caption(img: ElementRef<'_>) -> Option<String> {
    img.ancestors()
        .filter_map(ElementRef::wrap)
        .filter(|el| el.value().name() == "figure")
        .find_map(|figure| {
            figure
                .descendants()
                .filter_map(ElementRef::wrap)
                .find(|el| el.value().name() == "figcaption")
        })
        .map(|caption| normalize_text(&caption.text().collect::<String>()))
        .filter(|text| !text.is_empty())
}

fn is_data_url(src: &str) -> bool {
    src.trim_start().get(..5).is_some_and(|scheme| scheme.eq_ignore_ascii_case("data:"))
}

fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
