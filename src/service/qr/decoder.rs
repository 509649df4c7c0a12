use image::GrayImage;
use tracing::debug;

/// One QR decoding implementation. Returns the first non-empty text it finds.
pub trait QrDecoder: Send + Sync {
    fn name(&self) -> &'static str;

    fn decode(&self, image: &GrayImage) -> Option<String>;
}

pub struct RqrrDecoder;

impl QrDecoder for RqrrDecoder {
    fn name(&self) -> &'static str {
        "rqrr"
    }

    fn decode(&self, image: &GrayImage) -> Option<String> {
        let (width, height) = image.dimensions();
        let mut prepared =
            rqrr::PreparedImage::prepare_from_greyscale(width as usize, height as usize, |x, y| {
                image.get_pixel(x as u32, y as u32).0[0]
            });

        prepared
            .detect_grids()
            .into_iter()
            .find_map(|grid| match grid.decode() {
                Ok((_, content)) if !content.is_empty() => Some(content),
                Ok(_) => None,
                Err(err) => {
                    debug!(error = ?err, "rqrr found a grid it could not decode");
                    None
                }
            })
    }
}

#[cfg(feature = "quirc")]
pub struct QuircDecoder;

#[cfg(feature = "quirc")]
impl QrDecoder for QuircDecoder {
    fn name(&self) -> &'static str {
        "quirc"
    }

    fn decode(&self, image: &GrayImage) -> Option<String> {
        let (width, height) = image.dimensions();
        let mut quirc = quircs::Quirc::default();

        quirc
            .identify(width as usize, height as usize, image.as_raw())
            .find_map(|code| {
                let data = code.ok()?.decode().ok()?;
                String::from_utf8(data.payload)
                    .ok()
                    .filter(|text| !text.is_empty())
            })
    }
}

/// Decoders in priority order. Builds without the `quirc` feature only get `rqrr`.
pub fn default_decoders() -> Vec<Box<dyn QrDecoder>> {
    #[allow(unused_mut)]
    let mut decoders: Vec<Box<dyn QrDecoder>> = vec![Box::new(RqrrDecoder)];
    #[cfg(feature = "quirc")]
    decoders.push(Box::new(QuircDecoder));
    decoders
}
