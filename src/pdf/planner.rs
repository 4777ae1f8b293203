//! Attachment disposition planning and per-attachment transforms.
//!
//! Classification inspects the declared content type first and falls back to
//! the filename extension. Ambiguous declared types (missing or
//! `application/octet-stream`) with a PDF- or image-like extension resolve by
//! trusting the extension; that tie-break is a recorded policy choice, not an
//! upstream guarantee.

use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};

use printpdf::{Image, ImageTransform, Mm, PdfDocument};
use tracing::{debug, warn};

use crate::model::attachment::{Attachment, Disposition};

/// Raster image extensions eligible for convert-to-pdf.
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "tif", "tiff", "webp"];

/// One attachment with its decided disposition.
#[derive(Debug)]
pub struct PlannedAttachment<'a> {
    /// Index into the email's attachment list.
    pub index: usize,
    pub attachment: &'a Attachment,
    pub disposition: Disposition,
}

impl PlannedAttachment<'_> {
    /// Body-summary annotation for attachments that contribute no pages.
    pub fn note(&self) -> Option<&'static str> {
        match self.disposition {
            Disposition::ListOnly => {
                if self.attachment.is_embedded_message() {
                    Some("embedded message, not converted")
                } else {
                    Some("not converted")
                }
            }
            _ => None,
        }
    }
}

/// A merge-ready PDF fragment produced from one attachment.
pub struct Fragment {
    /// Index of the source attachment (for encounter-order sorting).
    pub index: usize,
    pub filename: String,
    pub pdf: Vec<u8>,
}

/// Classify every attachment that was not consumed as an inline image.
/// Output preserves attachment encounter order.
pub fn plan<'a>(
    attachments: &'a [Attachment],
    consumed_inline: &HashSet<usize>,
) -> Vec<PlannedAttachment<'a>> {
    attachments
        .iter()
        .enumerate()
        .filter(|(index, _)| !consumed_inline.contains(index))
        .map(|(index, attachment)| PlannedAttachment {
            index,
            attachment,
            disposition: classify(attachment),
        })
        .collect()
}

/// The disposition table. See [`Disposition`] for the external contract.
pub fn classify(attachment: &Attachment) -> Disposition {
    if attachment.is_embedded_message() {
        return Disposition::ListOnly;
    }

    let declared = attachment.content_type.to_lowercase();
    match declared.as_str() {
        "application/pdf" | "application/x-pdf" => return Disposition::MergeAsPdf,
        _ => {}
    }
    if is_raster_mime(&declared) {
        return Disposition::ConvertToPdf;
    }

    // Ambiguous declared type: trust the extension.
    if declared.is_empty() || declared == "application/octet-stream" {
        match attachment.extension().as_deref() {
            Some("pdf") => {
                debug!(filename = %attachment.filename, "ambiguous type, extension says PDF");
                return Disposition::MergeAsPdf;
            }
            Some(ext) if IMAGE_EXTENSIONS.contains(&ext) => {
                debug!(filename = %attachment.filename, "ambiguous type, extension says image");
                return Disposition::ConvertToPdf;
            }
            _ => {}
        }
    }

    Disposition::ListOnly
}

fn is_raster_mime(mime: &str) -> bool {
    matches!(
        mime,
        "image/png"
            | "image/jpeg"
            | "image/jpg"
            | "image/gif"
            | "image/bmp"
            | "image/tiff"
            | "image/webp"
    )
}

/// Run the planned transforms and collect merge-ready fragments in
/// encounter order.
///
/// An individual failure (corrupt image, bogus PDF bytes) downgrades that
/// attachment to list-only: a warning is recorded and the file's conversion
/// continues.
pub fn transform(plan: &[PlannedAttachment<'_>]) -> (Vec<Fragment>, Vec<String>) {
    let mut fragments = Vec::new();
    let mut warnings = Vec::new();

    for item in plan {
        match item.disposition {
            Disposition::ListOnly => {}
            Disposition::MergeAsPdf => {
                // Pass bytes through unchanged, but probe them now so a
                // corrupt attachment downgrades instead of failing assembly.
                match lopdf::Document::load_mem(&item.attachment.data) {
                    Ok(_) => fragments.push(Fragment {
                        index: item.index,
                        filename: item.attachment.filename.clone(),
                        pdf: item.attachment.data.clone(),
                    }),
                    Err(e) => {
                        warn!(filename = %item.attachment.filename, error = %e,
                            "PDF attachment unreadable, listing only");
                        warnings.push(format!(
                            "attachment '{}' not merged: unreadable PDF ({e})",
                            item.attachment.filename
                        ));
                    }
                }
            }
            Disposition::ConvertToPdf => match image_to_pdf_page(&item.attachment.data) {
                Ok(pdf) => fragments.push(Fragment {
                    index: item.index,
                    filename: item.attachment.filename.clone(),
                    pdf,
                }),
                Err(e) => {
                    warn!(filename = %item.attachment.filename, error = %e,
                        "image attachment conversion failed, listing only");
                    warnings.push(format!(
                        "attachment '{}' not converted: {e}",
                        item.attachment.filename
                    ));
                }
            },
        }
    }

    (fragments, warnings)
}

/// Render one image onto a single A4 page, aspect ratio preserved,
/// fit-to-page with a small margin.
fn image_to_pdf_page(data: &[u8]) -> Result<Vec<u8>, String> {
    // Decoders can panic on adversarial input; contain that to this
    // attachment.
    let decoded = catch_unwind(AssertUnwindSafe(|| image::load_from_memory(data)))
        .map_err(|_| "image decoder panicked".to_string())?
        .map_err(|e| e.to_string())?;

    let rgb = flatten_to_rgb(decoded);
    let (width_px, height_px) = (rgb.width(), rgb.height());
    if width_px == 0 || height_px == 0 {
        return Err("image has zero dimension".to_string());
    }

    let page_w = 210.0_f64;
    let page_h = 297.0_f64;
    let margin = 12.7_f64;
    let avail_w = page_w - 2.0 * margin;
    let avail_h = page_h - 2.0 * margin;

    // printpdf sizes an image as pixels/dpi; pick the dpi that makes the
    // tighter dimension exactly fill the available box.
    let dpi = (f64::from(width_px) * 25.4 / avail_w).max(f64::from(height_px) * 25.4 / avail_h);
    let display_w = f64::from(width_px) * 25.4 / dpi;
    let display_h = f64::from(height_px) * 25.4 / dpi;
    let translate_x = (page_w - display_w) / 2.0;
    let translate_y = (page_h - display_h) / 2.0;

    let (doc, page, layer) = PdfDocument::new("Attachment", Mm(210.0), Mm(297.0), "image");
    let layer = doc.get_page(page).get_layer(layer);

    Image::from_dynamic_image(&rgb).add_to_layer(
        layer,
        ImageTransform {
            translate_x: Some(Mm(translate_x as _)),
            translate_y: Some(Mm(translate_y as _)),
            dpi: Some(dpi as _),
            ..Default::default()
        },
    );

    doc.save_to_bytes().map_err(|e| e.to_string())
}

/// Flatten any alpha channel onto a white background, matching how the
/// message would look on paper.
fn flatten_to_rgb(img: image::DynamicImage) -> image::DynamicImage {
    if !img.color().has_alpha() {
        return image::DynamicImage::ImageRgb8(img.to_rgb8());
    }

    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut flat = image::RgbImage::new(width, height);
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let alpha = f32::from(pixel[3]) / 255.0;
        let blend = |channel: u8| -> u8 {
            (f32::from(channel) * alpha + 255.0 * (1.0 - alpha)).round() as u8
        };
        flat.put_pixel(
            x,
            y,
            image::Rgb([blend(pixel[0]), blend(pixel[1]), blend(pixel[2])]),
        );
    }
    image::DynamicImage::ImageRgb8(flat)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attachment(filename: &str, content_type: &str) -> Attachment {
        Attachment {
            filename: filename.to_string(),
            content_type: content_type.to_string(),
            data: Vec::new(),
            content_id: None,
            embedded: None,
        }
    }

    #[test]
    fn test_classify_pdf_by_type() {
        let att = attachment("whatever.bin", "application/pdf");
        assert_eq!(classify(&att), Disposition::MergeAsPdf);
    }

    #[test]
    fn test_classify_image_by_type() {
        let att = attachment("pic", "image/jpeg");
        assert_eq!(classify(&att), Disposition::ConvertToPdf);
    }

    #[test]
    fn test_classify_tie_trusts_extension() {
        let att = attachment("scan.png", "application/octet-stream");
        assert_eq!(classify(&att), Disposition::ConvertToPdf);
        let att = attachment("doc.pdf", "application/octet-stream");
        assert_eq!(classify(&att), Disposition::MergeAsPdf);
    }

    #[test]
    fn test_classify_known_type_beats_extension() {
        // Declared non-ambiguous type wins over an image-like extension.
        let att = attachment("data.png", "text/plain");
        assert_eq!(classify(&att), Disposition::ListOnly);
    }

    #[test]
    fn test_classify_other_is_list_only() {
        let att = attachment("report.docx", "application/msword");
        assert_eq!(classify(&att), Disposition::ListOnly);
    }

    #[test]
    fn test_classify_embedded_message_is_list_only() {
        use crate::model::address::EmailAddress;
        use crate::model::email::{Body, Email};
        let mut att = attachment("inner.msg", "application/vnd.ms-outlook");
        att.embedded = Some(Box::new(Email {
            subject: String::new(),
            sender: EmailAddress::new("", ""),
            recipients: Vec::new(),
            sent: None,
            received: None,
            body: Body::default(),
            attachments: Vec::new(),
        }));
        assert_eq!(classify(&att), Disposition::ListOnly);
    }

    #[test]
    fn test_plan_excludes_consumed_inline() {
        let attachments = vec![
            attachment("a.pdf", "application/pdf"),
            attachment("b.png", "image/png"),
        ];
        let consumed: HashSet<usize> = [1].into_iter().collect();
        let plan = plan(&attachments, &consumed);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].index, 0);
    }

    #[test]
    fn test_transform_downgrades_corrupt_image() {
        let mut att = attachment("broken.png", "image/png");
        att.data = vec![0xFF; 16];
        let planned = vec![PlannedAttachment {
            index: 0,
            attachment: &att,
            disposition: Disposition::ConvertToPdf,
        }];
        let (fragments, warnings) = transform(&planned);
        assert!(fragments.is_empty());
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("broken.png"));
    }

    #[test]
    fn test_transform_downgrades_corrupt_pdf() {
        let mut att = attachment("fake.pdf", "application/pdf");
        att.data = b"not a pdf at all".to_vec();
        let planned = vec![PlannedAttachment {
            index: 0,
            attachment: &att,
            disposition: Disposition::MergeAsPdf,
        }];
        let (fragments, warnings) = transform(&planned);
        assert!(fragments.is_empty());
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_transform_converts_valid_image() {
        let mut img = image::RgbImage::new(4, 4);
        for pixel in img.pixels_mut() {
            *pixel = image::Rgb([200, 10, 10]);
        }
        let mut png = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(
                &mut std::io::Cursor::new(&mut png),
                image::ImageOutputFormat::Png,
            )
            .unwrap();

        let mut att = attachment("ok.png", "image/png");
        att.data = png;
        let planned = vec![PlannedAttachment {
            index: 0,
            attachment: &att,
            disposition: Disposition::ConvertToPdf,
        }];
        let (fragments, warnings) = transform(&planned);
        assert_eq!(fragments.len(), 1);
        assert!(warnings.is_empty());
        assert!(fragments[0].pdf.starts_with(b"%PDF"));
    }

    #[test]
    fn test_flatten_alpha_onto_white() {
        let mut rgba = image::RgbaImage::new(1, 1);
        rgba.put_pixel(0, 0, image::Rgba([0, 0, 0, 0])); // fully transparent
        let flat = flatten_to_rgb(image::DynamicImage::ImageRgba8(rgba));
        let rgb = flat.to_rgb8();
        assert_eq!(rgb.get_pixel(0, 0).0, [255, 255, 255]);
    }
}
