//! Audio-file tag access via `lofty`: lookup queries in, front covers out.

use std::path::Path;

use lofty::config::{ParseOptions, ParsingMode, WriteOptions};
use lofty::error::LoftyError;
use lofty::file::{AudioFile, TaggedFile, TaggedFileExt};
use lofty::picture::{Picture, PictureType};
use lofty::prelude::Accessor;
use lofty::probe::Probe;
use lofty::read_from_path;
use lofty::tag::Tag;
use log::{debug, info};
use thiserror::Error;

use crate::providers::CoverQuery;

#[derive(Debug, Error)]
pub enum TagBridgeError {
    #[error("failed to read tags from {path}: {source}")]
    Read { path: String, source: LoftyError },
    #[error("{0} has neither an artist nor a title tag")]
    MissingTrackInfo(String),
    #[error("no writable tag available for {0}")]
    NoWritableTag(String),
    #[error("cover image is empty")]
    EmptyImage,
    #[error("cover image is not a supported picture: {0}")]
    Picture(LoftyError),
    #[error("failed to write tags to {path}: {source}")]
    Write { path: String, source: LoftyError },
}

fn first_non_empty_value<F>(primary_tag: Option<&Tag>, tags: &[Tag], mut extractor: F) -> String
where
    F: FnMut(&Tag) -> Option<String>,
{
    for tag in primary_tag.into_iter().chain(tags.iter()) {
        if let Some(value) = extractor(tag) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
    }
    String::new()
}

fn tag_parse_options(parsing_mode: ParsingMode, max_junk_bytes: usize) -> ParseOptions {
    ParseOptions::new()
        .read_properties(false)
        .read_cover_art(false)
        .parsing_mode(parsing_mode)
        .max_junk_bytes(max_junk_bytes)
}

/// Extension-based probe first, then a relaxed content sniff.
fn read_tagged_file(path: &Path) -> Result<TaggedFile, LoftyError> {
    let strict = Probe::open(path).and_then(|probe| {
        probe
            .options(tag_parse_options(ParsingMode::BestAttempt, 1024))
            .read()
    });
    match strict {
        Ok(tagged_file) => Ok(tagged_file),
        Err(error) => {
            debug!(
                "TagBridge: strict parse failed for {}, retrying relaxed: {}",
                path.display(),
                error
            );
            Probe::open(path)?
                .options(tag_parse_options(ParsingMode::Relaxed, 64 * 1024))
                .guess_file_type()?
                .read()
        }
    }
}

/// Builds a lookup query from the artist and title tags of `path`.
pub fn read_track_query(path: &Path) -> Result<CoverQuery, TagBridgeError> {
    let tagged_file = read_tagged_file(path).map_err(|source| TagBridgeError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let primary_tag = tagged_file.primary_tag();
    let tags = tagged_file.tags();

    let artist = first_non_empty_value(primary_tag, tags, |tag| {
        tag.artist().map(|value| value.to_string())
    });
    let title = first_non_empty_value(primary_tag, tags, |tag| {
        tag.title().map(|value| value.to_string())
    });

    let query = CoverQuery::new(&artist, &title);
    if query.is_blank() {
        return Err(TagBridgeError::MissingTrackInfo(path.display().to_string()));
    }
    Ok(query)
}

/// Replaces the front cover in the primary tag of `path`, creating the tag if needed.
pub fn embed_front_cover(path: &Path, image_bytes: &[u8]) -> Result<(), TagBridgeError> {
    if image_bytes.is_empty() {
        return Err(TagBridgeError::EmptyImage);
    }
    let mut reader = image_bytes;
    let mut picture = Picture::from_reader(&mut reader).map_err(TagBridgeError::Picture)?;
    picture.set_pic_type(PictureType::CoverFront);

    let mut tagged_file = read_from_path(path).map_err(|source| TagBridgeError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let tag_type = tagged_file.primary_tag_type();
    if tagged_file.tag(tag_type).is_none() {
        tagged_file.insert_tag(Tag::new(tag_type));
    }
    let tag = tagged_file
        .tag_mut(tag_type)
        .ok_or_else(|| TagBridgeError::NoWritableTag(format!("{tag_type:?}")))?;
    tag.remove_picture_type(PictureType::CoverFront);
    tag.push_picture(picture);

    tagged_file
        .save_to_path(path, WriteOptions::default())
        .map_err(|source| TagBridgeError::Write {
            path: path.display().to_string(),
            source,
        })?;
    info!(
        "TagBridge: embedded {} byte front cover into {}",
        image_bytes.len(),
        path.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{embed_front_cover, first_non_empty_value, read_track_query, TagBridgeError};
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use lofty::config::WriteOptions;
    use lofty::file::{AudioFile, TaggedFileExt};
    use lofty::picture::PictureType;
    use lofty::prelude::Accessor;
    use lofty::read_from_path;
    use lofty::tag::{Tag, TagType};
    use std::io::{Cursor, Write};

    fn silent_wav() -> Vec<u8> {
        let sample_rate: u32 = 8_000;
        let data_len: u32 = 1_600;
        let mut wav = Vec::new();
        wav.extend_from_slice(b"RIFF");
        wav.extend_from_slice(&(36 + data_len).to_le_bytes());
        wav.extend_from_slice(b"WAVE");
        wav.extend_from_slice(b"fmt ");
        wav.extend_from_slice(&16u32.to_le_bytes());
        wav.extend_from_slice(&1u16.to_le_bytes());
        wav.extend_from_slice(&1u16.to_le_bytes());
        wav.extend_from_slice(&sample_rate.to_le_bytes());
        wav.extend_from_slice(&(sample_rate * 2).to_le_bytes());
        wav.extend_from_slice(&2u16.to_le_bytes());
        wav.extend_from_slice(&16u16.to_le_bytes());
        wav.extend_from_slice(b"data");
        wav.extend_from_slice(&data_len.to_le_bytes());
        wav.resize(wav.len() + data_len as usize, 0);
        wav
    }

    fn temp_file_with(suffix: &str, bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(suffix)
            .tempfile()
            .expect("temp file should be created");
        file.write_all(bytes).expect("temp file should be writable");
        file.flush().expect("temp file should flush");
        file
    }

    fn cover_png() -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([10, 20, 30])))
            .write_to(&mut cursor, ImageFormat::Png)
            .expect("png encoding should succeed");
        cursor.into_inner()
    }

    #[test]
    fn test_first_non_empty_value_prefers_primary_then_falls_back() {
        let mut primary = Tag::new(TagType::Id3v2);
        primary.set_artist("   ".to_string());
        primary.set_title(" Song Y ".to_string());
        let mut secondary = Tag::new(TagType::RiffInfo);
        secondary.set_artist("Artist X".to_string());
        let tags = vec![secondary];

        let artist = first_non_empty_value(Some(&primary), &tags, |tag| {
            tag.artist().map(|value| value.to_string())
        });
        let title = first_non_empty_value(Some(&primary), &tags, |tag| {
            tag.title().map(|value| value.to_string())
        });
        assert_eq!(artist, "Artist X");
        assert_eq!(title, "Song Y");
        assert_eq!(
            first_non_empty_value(None, &[], |tag| tag.album().map(|v| v.to_string())),
            ""
        );
    }

    #[test]
    fn test_read_track_query_rejects_non_audio_file() {
        let file = temp_file_with(".txt", b"definitely not audio");
        let error = read_track_query(file.path()).expect_err("text file should not parse");
        assert!(matches!(error, TagBridgeError::Read { .. }));
    }

    #[test]
    fn test_embed_front_cover_rejects_empty_image() {
        let file = temp_file_with(".wav", &silent_wav());
        let error = embed_front_cover(file.path(), &[]).expect_err("empty cover should fail");
        assert!(matches!(error, TagBridgeError::EmptyImage));
    }

    #[test]
    fn test_embed_front_cover_rejects_non_picture_bytes() {
        let file = temp_file_with(".wav", &silent_wav());
        let error = embed_front_cover(file.path(), b"<html>nope</html>")
            .expect_err("html should not become a picture");
        assert!(matches!(error, TagBridgeError::Picture(_)));
    }

    #[test]
    fn test_wav_round_trip_reads_query_and_embeds_cover() {
        let file = temp_file_with(".wav", &silent_wav());

        let mut tagged_file = read_from_path(file.path()).expect("wav should parse");
        let tag_type = tagged_file.primary_tag_type();
        let mut tag = Tag::new(tag_type);
        tag.set_artist("Artist X".to_string());
        tag.set_title("Song Y".to_string());
        tagged_file.insert_tag(tag);
        tagged_file
            .save_to_path(file.path(), WriteOptions::default())
            .expect("tags should save");

        let query = read_track_query(file.path()).expect("query should be read");
        assert_eq!(query.artist, "Artist X");
        assert_eq!(query.title, "Song Y");

        let cover = cover_png();
        embed_front_cover(file.path(), &cover).expect("cover should embed");
        embed_front_cover(file.path(), &cover).expect("cover should be replaced");

        let refreshed = read_from_path(file.path()).expect("wav should parse after embed");
        let tag = refreshed.primary_tag().expect("primary tag should exist");
        let fronts: Vec<_> = tag
            .pictures()
            .iter()
            .filter(|picture| picture.pic_type() == PictureType::CoverFront)
            .collect();
        assert_eq!(fronts.len(), 1);
        assert_eq!(fronts[0].data(), cover.as_slice());
        assert_eq!(tag.artist().as_deref(), Some("Artist X"));
    }
}
