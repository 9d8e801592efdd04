//! Native GeoTIFF reading/writing (without GDAL dependency)
//!
//! Uses the `tiff` crate for TIFF I/O. Multi-band files are stored as a
//! sequence of TIFF directories; band indices are 1-based throughout.
//! Samples are written as 32-bit floats, so integer rasters must stay
//! within the exactly representable range (|value| <= 2^24).

use crate::error::{Error, Result};
use crate::raster::{GeoTransform, Raster, RasterElement};
use std::fs::File;
use std::io::{Seek, Write};
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::colortype::Gray32Float;
use tiff::encoder::TiffEncoder;
use tiff::tags::Tag;

/// Largest integer magnitude that survives a 32-bit float sample
const MAX_EXACT_F32_INT: f64 = 16_777_216.0;

/// Read one band of a GeoTIFF file into a Raster
///
/// `band` is a 1-based TIFF directory index; `None` reads the first band.
///
/// # Errors
/// Fails if the file is not a decodable TIFF, the band index exceeds the
/// number of directories, or the pixel format is unsupported.
pub fn read_geotiff<T, P>(path: P, band: Option<usize>) -> Result<Raster<T>>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let file = File::open(path.as_ref())?;
    let mut decoder = Decoder::new(file)
        .map_err(|e| Error::Codec(format!("TIFF decode error: {}", e)))?;

    seek_band(&mut decoder, band.unwrap_or(1))?;
    decode_band(&mut decoder)
}

/// Count the bands (TIFF directories) of a GeoTIFF file
pub fn geotiff_band_count<P: AsRef<Path>>(path: P) -> Result<usize> {
    let file = File::open(path.as_ref())?;
    let mut decoder = Decoder::new(file)
        .map_err(|e| Error::Codec(format!("TIFF decode error: {}", e)))?;

    let mut count = 1;
    while decoder.more_images() {
        decoder
            .next_image()
            .map_err(|e| Error::Codec(format!("Cannot advance to band {}: {}", count + 1, e)))?;
        count += 1;
    }
    Ok(count)
}

/// Advance the decoder so the current directory is the requested 1-based band
fn seek_band<R>(decoder: &mut Decoder<R>, band: usize) -> Result<()>
where
    R: std::io::Read + std::io::Seek,
{
    if band == 0 {
        return Err(Error::BandOutOfRange { band: 0, count: 0 });
    }
    let mut reached = 1;
    while reached < band {
        if !decoder.more_images() {
            return Err(Error::BandOutOfRange { band, count: reached });
        }
        decoder
            .next_image()
            .map_err(|e| Error::Codec(format!("Cannot advance to band {}: {}", reached + 1, e)))?;
        reached += 1;
    }
    Ok(())
}

/// Decode the decoder's current directory into a Raster
fn decode_band<T, R>(decoder: &mut Decoder<R>) -> Result<Raster<T>>
where
    T: RasterElement,
    R: std::io::Read + std::io::Seek,
{
    let (width, height) = decoder
        .dimensions()
        .map_err(|e| Error::Codec(format!("Cannot read dimensions: {}", e)))?;

    let rows = height as usize;
    let cols = width as usize;

    let result = decoder
        .read_image()
        .map_err(|e| Error::Codec(format!("Cannot read image data: {}", e)))?;

    macro_rules! cast_buf {
        ($buf:expr) => {
            $buf.iter()
                .map(|&v| num_traits::cast(v).unwrap_or(T::default_nodata()))
                .collect()
        };
    }

    let data: Vec<T> = match result {
        DecodingResult::F32(buf) => cast_buf!(buf),
        DecodingResult::F64(buf) => cast_buf!(buf),
        DecodingResult::U8(buf) => cast_buf!(buf),
        DecodingResult::U16(buf) => cast_buf!(buf),
        DecodingResult::U32(buf) => cast_buf!(buf),
        DecodingResult::I8(buf) => cast_buf!(buf),
        DecodingResult::I16(buf) => cast_buf!(buf),
        DecodingResult::I32(buf) => cast_buf!(buf),
        _ => return Err(Error::UnsupportedDataType("Unsupported TIFF pixel format".to_string())),
    };

    if data.len() != rows * cols {
        return Err(Error::InvalidDimensions {
            width: cols,
            height: rows,
        });
    }

    let mut raster = Raster::from_vec(data, rows, cols)?;

    // ModelTiepointTag + ModelPixelScaleTag, when present
    if let Ok(transform) = read_geotransform(decoder) {
        raster.set_transform(transform);
    }

    if let Ok(text) = decoder.get_tag_ascii_string(Tag::GdalNodata) {
        if let Ok(value) = text.trim().trim_end_matches('\0').parse::<f64>() {
            raster.set_nodata(num_traits::cast(value));
        }
    }

    Ok(raster)
}

/// Attempt to read a GeoTransform from TIFF tags
fn read_geotransform<R: std::io::Read + std::io::Seek>(
    decoder: &mut Decoder<R>,
) -> Result<GeoTransform> {
    let scale = decoder
        .get_tag_f64_vec(Tag::ModelPixelScaleTag)
        .map_err(|_| Error::Codec("No pixel scale tag".into()))?;

    let tiepoint = decoder
        .get_tag_f64_vec(Tag::ModelTiepointTag)
        .map_err(|_| Error::Codec("No tiepoint tag".into()))?;

    if scale.len() >= 2 && tiepoint.len() >= 6 {
        // tiepoint: [I, J, K, X, Y, Z]
        // scale: [ScaleX, ScaleY, ScaleZ]
        let origin_x = tiepoint[3] - tiepoint[0] * scale[0];
        let origin_y = tiepoint[4] + tiepoint[1] * scale[1];
        let pixel_width = scale[0];
        let pixel_height = -scale[1]; // Negative for north-up

        return Ok(GeoTransform::new(origin_x, origin_y, pixel_width, pixel_height));
    }

    Err(Error::Codec("Cannot determine geotransform".into()))
}

/// Write a Raster to a single-band GeoTIFF file
///
/// Samples are 32-bit floats with ModelPixelScale/ModelTiepoint tags, a
/// minimal GeoKey directory and, when nodata is set, the GDAL nodata tag.
pub fn write_geotiff<T, P>(raster: &Raster<T>, path: P) -> Result<()>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let file = File::create(path.as_ref())?;
    let mut encoder = TiffEncoder::new(file)
        .map_err(|e| Error::Codec(format!("TIFF encoder error: {}", e)))?;
    encode_band(&mut encoder, raster)
}

/// Write several same-shape rasters as the bands of one GeoTIFF file
///
/// Each raster becomes one TIFF directory, in order. Used to produce
/// multi-band elevation sources.
pub fn write_geotiff_bands<T, P>(bands: &[&Raster<T>], path: P) -> Result<()>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let first = bands
        .first()
        .ok_or_else(|| Error::InvalidParameter {
            name: "bands",
            value: "[]".to_string(),
            reason: "at least one band is required".to_string(),
        })?;

    for band in &bands[1..] {
        if band.shape() != first.shape() {
            let (er, ec) = first.shape();
            let (ar, ac) = band.shape();
            return Err(Error::SizeMismatch { er, ec, ar, ac });
        }
    }

    let file = File::create(path.as_ref())?;
    let mut encoder = TiffEncoder::new(file)
        .map_err(|e| Error::Codec(format!("TIFF encoder error: {}", e)))?;

    for band in bands {
        encode_band(&mut encoder, band)?;
    }
    Ok(())
}

/// Encode one raster as the encoder's next directory
fn encode_band<T, W>(encoder: &mut TiffEncoder<W>, raster: &Raster<T>) -> Result<()>
where
    T: RasterElement,
    W: Write + Seek,
{
    let (rows, cols) = raster.shape();

    let mut data: Vec<f32> = Vec::with_capacity(raster.len());
    for &v in raster.data().iter() {
        let value = v.to_f64().unwrap_or(f64::NAN);
        if !T::is_float() && value.abs() > MAX_EXACT_F32_INT {
            return Err(Error::Codec(format!(
                "integer sample {} does not survive the 32-bit float sample format",
                value
            )));
        }
        data.push(value as f32);
    }

    let mut image = encoder
        .new_image::<Gray32Float>(cols as u32, rows as u32)
        .map_err(|e| Error::Codec(format!("Cannot create TIFF image: {}", e)))?;

    let gt = raster.transform();

    let scale = vec![gt.pixel_width, gt.pixel_height.abs(), 0.0];
    image
        .encoder()
        .write_tag(Tag::ModelPixelScaleTag, scale.as_slice())
        .map_err(|e| Error::Codec(format!("Cannot write scale tag: {}", e)))?;

    let tiepoint = vec![0.0, 0.0, 0.0, gt.origin_x, gt.origin_y, 0.0];
    image
        .encoder()
        .write_tag(Tag::ModelTiepointTag, tiepoint.as_slice())
        .map_err(|e| Error::Codec(format!("Cannot write tiepoint tag: {}", e)))?;

    // Minimal GeoKey directory so GIS tools recognize the file.
    // GTModelTypeGeoKey=1 (Projected), GTRasterTypeGeoKey=1 (PixelIsArea).
    let geokeys: Vec<u16> = vec![
        1, 1, 0, 2, // Version 1.1.0, 2 keys
        1024, 0, 1, 1, // GTModelTypeGeoKey = ModelTypeProjected
        1025, 0, 1, 1, // GTRasterTypeGeoKey = RasterPixelIsArea
    ];
    image
        .encoder()
        .write_tag(Tag::GeoKeyDirectoryTag, geokeys.as_slice())
        .map_err(|e| Error::Codec(format!("Cannot write geokey tag: {}", e)))?;

    if let Some(nodata) = raster.nodata() {
        let text = format!("{}", nodata.to_f64().unwrap_or(f64::NAN));
        image
            .encoder()
            .write_tag(Tag::GdalNodata, text.as_str())
            .map_err(|e| Error::Codec(format!("Cannot write nodata tag: {}", e)))?;
    }

    image
        .write_data(&data)
        .map_err(|e| Error::Codec(format!("Cannot write image data: {}", e)))?;

    Ok(())
}
