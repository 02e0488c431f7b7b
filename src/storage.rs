//! Uploaded files and images on the local disk.
//!
//! Paths handed to [`Storage`] are relative to its root and end with `/`
//! (`"posts/"`). Images are re-encoded as JPEG, fitted into
//! [`IMAGE_SIZE`] pixels, and may get a cropped copy under `thumbnails/`.

use crate::error::AppError;
use crate::strings::{random_string, slug};
use axum::extract::Multipart;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use serde::Serialize;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const IMAGE_SIZE: u32 = 1024;
pub const IMAGE_QUALITY: u8 = 80;
pub const THUMBNAIL_SIZE: u32 = 512;
pub const THUMBNAIL_QUALITY: u8 = 50;
const THUMBNAILS_DIR: &str = "thumbnails/";
const MISSING_IMAGE: &str = "not-found.jpg";
const MAX_NAME_LENGTH: usize = 128;

/// A file received in a multipart body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadedFile {
    pub file_name: Option<String>,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    /// Lowercased extension of the client file name, without the dot.
    pub fn extension(&self) -> Option<String> {
        let name = self.file_name.as_deref()?;
        let (_, ext) = name.rsplit_once('.')?;
        (!ext.is_empty()).then(|| ext.to_ascii_lowercase())
    }
}

/// Reads the first field called `field` out of a multipart body.
pub async fn read_upload(multipart: &mut Multipart, field: &str) -> Result<Option<UploadedFile>, AppError> {
    while let Some(part) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        if part.name() != Some(field) {
            continue;
        }
        let file_name = part.file_name().map(str::to_string);
        let bytes = part
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(e.to_string()))?;
        return Ok(Some(UploadedFile {
            file_name,
            bytes: bytes.to_vec(),
        }));
    }
    Ok(None)
}

/// Thumbnail box for [`Storage::store_image`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Thumbnail {
    None,
    Default,
    Square(u32),
    Sized(u32, u32),
}

impl Thumbnail {
    fn dimensions(&self) -> Option<(u32, u32)> {
        match *self {
            Thumbnail::None => None,
            Thumbnail::Default => Some((THUMBNAIL_SIZE, THUMBNAIL_SIZE)),
            Thumbnail::Square(s) => Some((s, s)),
            Thumbnail::Sized(w, h) => Some((w, h)),
        }
    }
}

/// Names of a stored image and its thumbnail, plus the directory they live in.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StoredImage {
    pub image: String,
    pub thumbnail: Option<String>,
    pub path: String,
}

/// Public URLs of an image and its thumbnail.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ImageUrls {
    pub image: String,
    pub thumbnail: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Image,
    Html,
    Doc,
    Text,
    Video,
    Audio,
    Pdf,
    Other,
}

/// Classifies a file by its extension.
pub fn file_type(file_name: &str) -> FileType {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, e)| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "gif" | "png" | "jpg" | "jpeg" => FileType::Image,
        "htm" | "html" => FileType::Html,
        "rtf" | "doc" | "docx" | "xls" | "xlsx" | "ppt" | "pptx" | "pps" | "pot" | "potx"
        | "ods" | "odt" | "pages" | "ai" | "dxf" | "ttf" | "tif" | "tiff" | "wmf" | "ps"
        | "eps" => FileType::Doc,
        "txt" | "md" | "csv" | "nfo" | "php" | "ini" => FileType::Text,
        "o" | "og" | "mp4" | "webm" => FileType::Video,
        "ogg" | "mp3" | "wav" => FileType::Audio,
        "pdf" => FileType::Pdf,
        _ => FileType::Other,
    }
}

/// `{prefix}_{name}_{postfix}` as an `_` slug of at most 128 characters.
/// A `random` or `random-N` postfix becomes N (default 16) random alphanumerics.
pub fn generate_name(name: &str, prefix: Option<&str>, postfix: Option<&str>) -> String {
    let mut raw = String::new();
    if let Some(p) = prefix {
        raw.push_str(p);
        raw.push('_');
    }
    raw.push_str(name);
    if let Some(p) = postfix {
        let p = if p.contains("random") {
            let len = p
                .split('-')
                .nth(1)
                .and_then(|n| n.parse().ok())
                .unwrap_or(16);
            random_string(len)
        } else {
            p.to_string()
        };
        raw.push('_');
        raw.push_str(&p);
    }
    let limited: String = raw.chars().take(MAX_NAME_LENGTH).collect();
    slug(&limited, '_')
}

/// `photo.jpg` -> `photo_256x256.jpg`; size 0 keeps the name.
pub fn thumbnail_name(image: &str, size: u32) -> String {
    if size == 0 {
        return image.to_string();
    }
    image.replace(".jpg", &format!("_{}x{}.jpg", size, size))
}

fn invalid_image(e: image::ImageError) -> AppError {
    tracing::warn!(error = %e, "rejected image upload");
    AppError::BadRequest("The file is not a valid image.".into())
}

fn write_jpeg(img: &DynamicImage, path: &Path, quality: u8) -> Result<(), AppError> {
    let mut writer = BufWriter::new(fs::File::create(path)?);
    JpegEncoder::new_with_quality(&mut writer, quality)
        .encode_image(&img.to_rgb8())
        .map_err(|e| AppError::Internal(format!("jpeg encoding: {}", e)))?;
    writer.flush()?;
    Ok(())
}

/// A directory on the local disk exposed under `public_url`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Storage {
    root: PathBuf,
    public_url: String,
}

impl Storage {
    pub fn new(root: impl Into<PathBuf>, public_url: impl Into<String>) -> Self {
        Storage {
            root: root.into(),
            public_url: public_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute location of `relative` under the root.
    pub fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative.trim_start_matches('/'))
    }

    fn ensure_dir(&self, dir: &str) -> Result<PathBuf, AppError> {
        let path = self.path(dir);
        fs::create_dir_all(&path)?;
        Ok(path)
    }

    /// Writes `file` into `save_to` as `{name}.{ext}` and returns that file
    /// name. Without a name, 16 random alphanumerics are used.
    pub fn save_file(&self, file: &UploadedFile, save_to: &str, name: Option<&str>) -> Result<String, AppError> {
        let stem = name.map(str::to_string).unwrap_or_else(|| random_string(16));
        let file_name = match file.extension() {
            Some(ext) => format!("{}.{}", stem, ext),
            None => stem,
        };
        let dir = self.ensure_dir(save_to)?;
        fs::write(dir.join(&file_name), &file.bytes)?;
        tracing::debug!(path = save_to, file = %file_name, "file stored");
        Ok(file_name)
    }

    /// `false` when the file was not there.
    pub fn delete_file(&self, file_name: &str, path: &str) -> Result<bool, AppError> {
        let target = self.path(&format!("{}{}", path, file_name));
        if !target.is_file() {
            tracing::warn!(path = %target.display(), "file to delete not found");
            return Ok(false);
        }
        fs::remove_file(target)?;
        Ok(true)
    }

    pub fn file_url(&self, file_name: &str, path: &str) -> String {
        format!("{}/{}{}", self.public_url, path.trim_start_matches('/'), file_name)
    }

    /// Decodes `upload`, fits it into [`IMAGE_SIZE`] and stores it as
    /// `{name}.jpg` under `path`, with an optional cropped thumbnail under
    /// `path/thumbnails/`. Sized thumbnails get a `_{w}x{h}` suffix unless
    /// `default_size_name` is set. Nothing is written when decoding fails.
    pub fn store_image(
        &self,
        upload: Option<&UploadedFile>,
        path: &str,
        name: Option<&str>,
        thumbnail: Thumbnail,
        default_size_name: bool,
    ) -> Result<Option<StoredImage>, AppError> {
        let Some(upload) = upload else {
            return Ok(None);
        };
        let img = image::load_from_memory(&upload.bytes).map_err(invalid_image)?;
        let stem = name.map(str::to_string).unwrap_or_else(|| random_string(128));
        let image_name = format!("{}.jpg", stem);

        let fitted = if img.width() > IMAGE_SIZE || img.height() > IMAGE_SIZE {
            img.resize(IMAGE_SIZE, IMAGE_SIZE, FilterType::Lanczos3)
        } else {
            img
        };
        let image_path = self.ensure_dir(path)?.join(&image_name);
        write_jpeg(&fitted, &image_path, IMAGE_QUALITY)?;

        let mut thumbnail_file = None;
        if let Some((w, h)) = thumbnail.dimensions() {
            let thumb_name = match thumbnail {
                Thumbnail::Square(_) | Thumbnail::Sized(..) if !default_size_name => {
                    format!("{}_{}x{}.jpg", stem, w, h)
                }
                _ => image_name.clone(),
            };
            let written = self
                .ensure_dir(&format!("{}{}", path, THUMBNAILS_DIR))
                .and_then(|dir| {
                    let thumb = fitted.resize_to_fill(w, h, FilterType::Lanczos3);
                    write_jpeg(&thumb, &dir.join(&thumb_name), THUMBNAIL_QUALITY)
                });
            if let Err(e) = written {
                let _ = fs::remove_file(&image_path);
                return Err(e);
            }
            thumbnail_file = Some(thumb_name);
        }

        tracing::info!(path, image = %image_name, "image stored");
        Ok(Some(StoredImage {
            image: image_name,
            thumbnail: thumbnail_file,
            path: path.to_string(),
        }))
    }

    /// Removes an image and its thumbnail of the given size; missing files are skipped.
    pub fn delete_image(&self, path: &str, image: &str, size: u32) -> Result<(), AppError> {
        let full = self.path(&format!("{}{}", path, image));
        let thumb = self.path(&format!("{}{}{}", path, THUMBNAILS_DIR, thumbnail_name(image, size)));
        for target in [full, thumb] {
            if target.is_file() {
                fs::remove_file(target)?;
            }
        }
        Ok(())
    }

    /// Removes every image in `images`, with its thumbnail when one was stored.
    pub fn delete_images_stored(&self, images: &[StoredImage]) -> Result<(), AppError> {
        for stored in images {
            self.delete_image(&stored.path, &stored.image, 0)?;
            if let Some(thumb) = stored.thumbnail.as_deref().filter(|t| *t != stored.image) {
                let target = self.path(&format!("{}{}{}", stored.path, THUMBNAILS_DIR, thumb));
                if target.is_file() {
                    fs::remove_file(target)?;
                }
            }
        }
        Ok(())
    }

    /// URLs of an image and its thumbnail; a missing name points at `not-found.jpg`.
    pub fn image_url(&self, path: &str, image: Option<&str>, size: u32) -> ImageUrls {
        let image = image.unwrap_or(MISSING_IMAGE);
        ImageUrls {
            image: self.file_url(image, path),
            thumbnail: self.file_url(&thumbnail_name(image, size), &format!("{}{}", path, THUMBNAILS_DIR)),
        }
    }
}
