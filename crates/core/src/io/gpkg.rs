//! Minimal GeoPackage writer
//!
//! Produces a spec-compliant single-layer GeoPackage: the three required
//! metadata tables plus one feature table. Geometries are stored as the
//! standard GeoPackage binary (GP header, XY envelope, little-endian WKB).
//! Line strings and polygons cover the stream network outputs; nothing
//! here reads GeoPackages back beyond what the tests need.

use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::vector::{AttributeValue, Feature, FeatureCollection, FieldKind, FieldSpec};
use byteorder::{LittleEndian, WriteBytesExt};
use geo_types::{Geometry, LineString, Polygon};
use rusqlite::Connection;
use std::path::Path;

/// Geometry type declared for a GeoPackage layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpkgGeometry {
    LineString,
    Polygon,
}

impl GpkgGeometry {
    fn type_name(self) -> &'static str {
        match self {
            GpkgGeometry::LineString => "LINESTRING",
            GpkgGeometry::Polygon => "POLYGON",
        }
    }

    fn wkb_code(self) -> u32 {
        match self {
            GpkgGeometry::LineString => 2,
            GpkgGeometry::Polygon => 3,
        }
    }
}

/// Write a feature collection as a single-layer GeoPackage file.
///
/// An existing file at `path` is replaced. Attribute columns follow the
/// explicit `fields` schema; properties absent from a feature become SQL
/// NULL. The layer's spatial reference is taken from `crs` when it carries
/// an EPSG code, otherwise srs id 0 (undefined geographic) is used.
pub fn write_gpkg<P: AsRef<Path>>(
    collection: &FeatureCollection,
    path: P,
    layer_name: &str,
    geometry: GpkgGeometry,
    fields: &[FieldSpec],
    crs: Option<&CRS>,
) -> Result<()> {
    let path = path.as_ref();
    if path.exists() {
        std::fs::remove_file(path)?;
    }

    let mut conn = Connection::open(path)?;
    // "GPKG" in ASCII, plus version 1.3.0
    conn.pragma_update(None, "application_id", 0x4750_4B47_i64)?;
    conn.pragma_update(None, "user_version", 10300_i64)?;

    let srs_id = crs.and_then(|c| c.epsg()).map(|c| c as i64).unwrap_or(0);

    let tx = conn.transaction()?;
    create_metadata_tables(&tx)?;
    register_srs(&tx, srs_id, crs)?;
    create_feature_table(&tx, layer_name, fields)?;

    {
        let column_names: Vec<String> = fields.iter().map(|f| format!("\"{}\"", f.name)).collect();
        let placeholders: Vec<String> = (0..fields.len() + 1).map(|i| format!("?{}", i + 1)).collect();
        let sql = format!(
            "INSERT INTO \"{}\" (geom{}{}) VALUES ({})",
            layer_name,
            if fields.is_empty() { "" } else { ", " },
            column_names.join(", "),
            placeholders.join(", "),
        );
        let mut stmt = tx.prepare(&sql)?;

        for (index, feature) in collection.iter().enumerate() {
            let blob = match &feature.geometry {
                Some(geom) => Some(encode_geometry(geom, geometry, srs_id, index)?),
                None => None,
            };

            let mut values: Vec<rusqlite::types::Value> = Vec::with_capacity(fields.len() + 1);
            values.push(match blob {
                Some(b) => rusqlite::types::Value::Blob(b),
                None => rusqlite::types::Value::Null,
            });
            for field in fields {
                values.push(attribute_to_sql(feature, field));
            }
            stmt.execute(rusqlite::params_from_iter(values))?;
        }
    }

    let envelope = collection_envelope(collection);
    register_layer(&tx, layer_name, geometry, srs_id, envelope)?;

    tx.commit()?;
    Ok(())
}

fn create_metadata_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE gpkg_spatial_ref_sys (
             srs_name TEXT NOT NULL,
             srs_id INTEGER NOT NULL PRIMARY KEY,
             organization TEXT NOT NULL,
             organization_coordsys_id INTEGER NOT NULL,
             definition TEXT NOT NULL,
             description TEXT
         );
         CREATE TABLE gpkg_contents (
             table_name TEXT NOT NULL PRIMARY KEY,
             data_type TEXT NOT NULL,
             identifier TEXT UNIQUE,
             description TEXT DEFAULT '',
             last_change DATETIME NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
             min_x DOUBLE,
             min_y DOUBLE,
             max_x DOUBLE,
             max_y DOUBLE,
             srs_id INTEGER,
             CONSTRAINT fk_gc_r_srs_id FOREIGN KEY (srs_id) REFERENCES gpkg_spatial_ref_sys(srs_id)
         );
         CREATE TABLE gpkg_geometry_columns (
             table_name TEXT NOT NULL,
             column_name TEXT NOT NULL,
             geometry_type_name TEXT NOT NULL,
             srs_id INTEGER NOT NULL,
             z TINYINT NOT NULL,
             m TINYINT NOT NULL,
             CONSTRAINT pk_geom_cols PRIMARY KEY (table_name, column_name)
         );",
    )?;
    Ok(())
}

fn register_srs(conn: &Connection, srs_id: i64, crs: Option<&CRS>) -> Result<()> {
    // The two undefined systems and WGS84 are mandatory rows.
    conn.execute(
        "INSERT INTO gpkg_spatial_ref_sys VALUES
             ('Undefined cartesian SRS', -1, 'NONE', -1, 'undefined', 'undefined cartesian coordinate reference system'),
             ('Undefined geographic SRS', 0, 'NONE', 0, 'undefined', 'undefined geographic coordinate reference system'),
             ('WGS 84 geodetic', 4326, 'EPSG', 4326,
              'GEOGCS[\"WGS 84\",DATUM[\"WGS_1984\",SPHEROID[\"WGS 84\",6378137,298.257223563]],PRIMEM[\"Greenwich\",0],UNIT[\"degree\",0.0174532925199433]]',
              'longitude/latitude coordinates in decimal degrees')",
        [],
    )?;

    if srs_id > 0 && srs_id != 4326 {
        let definition = crs.and_then(|c| c.wkt()).unwrap_or("undefined");
        conn.execute(
            "INSERT INTO gpkg_spatial_ref_sys
                 (srs_name, srs_id, organization, organization_coordsys_id, definition)
             VALUES (?1, ?2, 'EPSG', ?2, ?3)",
            rusqlite::params![format!("EPSG:{}", srs_id), srs_id, definition],
        )?;
    }
    Ok(())
}

fn create_feature_table(conn: &Connection, layer_name: &str, fields: &[FieldSpec]) -> Result<()> {
    let mut columns = String::from("fid INTEGER PRIMARY KEY AUTOINCREMENT, geom BLOB");
    for field in fields {
        let sql_type = match field.kind {
            FieldKind::Integer => "INTEGER",
            FieldKind::Real => "REAL",
            FieldKind::Text => "TEXT",
        };
        columns.push_str(&format!(", \"{}\" {}", field.name, sql_type));
    }
    conn.execute(&format!("CREATE TABLE \"{}\" ({})", layer_name, columns), [])?;
    Ok(())
}

fn register_layer(
    conn: &Connection,
    layer_name: &str,
    geometry: GpkgGeometry,
    srs_id: i64,
    envelope: Option<[f64; 4]>,
) -> Result<()> {
    let (min_x, min_y, max_x, max_y) = match envelope {
        Some([min_x, min_y, max_x, max_y]) => (Some(min_x), Some(min_y), Some(max_x), Some(max_y)),
        None => (None, None, None, None),
    };
    conn.execute(
        "INSERT INTO gpkg_contents
             (table_name, data_type, identifier, min_x, min_y, max_x, max_y, srs_id)
         VALUES (?1, 'features', ?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![layer_name, min_x, min_y, max_x, max_y, srs_id],
    )?;
    conn.execute(
        "INSERT INTO gpkg_geometry_columns VALUES (?1, 'geom', ?2, ?3, 0, 0)",
        rusqlite::params![layer_name, geometry.type_name(), srs_id],
    )?;
    Ok(())
}

fn attribute_to_sql(feature: &Feature, field: &FieldSpec) -> rusqlite::types::Value {
    match feature.get_property(field.name) {
        Some(AttributeValue::Int(v)) => rusqlite::types::Value::Integer(*v),
        Some(AttributeValue::Float(v)) => rusqlite::types::Value::Real(*v),
        Some(AttributeValue::String(v)) => rusqlite::types::Value::Text(v.clone()),
        Some(AttributeValue::Null) | None => rusqlite::types::Value::Null,
    }
}

/// Standard GeoPackage binary: magic, version, flags, srs id, envelope, WKB
fn encode_geometry(
    geom: &Geometry<f64>,
    declared: GpkgGeometry,
    srs_id: i64,
    index: usize,
) -> Result<Vec<u8>> {
    let mut blob = Vec::with_capacity(64);
    blob.extend_from_slice(b"GP");
    blob.push(0); // version 1
    blob.push(0x03); // little-endian, XY envelope

    blob.write_i32::<LittleEndian>(srs_id as i32)
        .map_err(|e| Error::Geopackage(e.to_string()))?;

    let [min_x, min_y, max_x, max_y] = geometry_envelope(geom).ok_or_else(|| {
        Error::Geopackage(format!("feature {} has an empty geometry", index))
    })?;
    for value in [min_x, max_x, min_y, max_y] {
        blob.write_f64::<LittleEndian>(value)
            .map_err(|e| Error::Geopackage(e.to_string()))?;
    }

    match (geom, declared) {
        (Geometry::LineString(line), GpkgGeometry::LineString) => {
            write_wkb_line_string(&mut blob, line, declared)?
        }
        (Geometry::Polygon(polygon), GpkgGeometry::Polygon) => {
            write_wkb_polygon(&mut blob, polygon, declared)?
        }
        _ => {
            return Err(Error::Geopackage(format!(
                "feature {} geometry does not match declared layer type {}",
                index,
                declared.type_name()
            )))
        }
    }
    Ok(blob)
}

fn write_wkb_line_string(
    out: &mut Vec<u8>,
    line: &LineString<f64>,
    declared: GpkgGeometry,
) -> Result<()> {
    out.push(1); // little endian
    out.write_u32::<LittleEndian>(declared.wkb_code())
        .map_err(|e| Error::Geopackage(e.to_string()))?;
    out.write_u32::<LittleEndian>(line.0.len() as u32)
        .map_err(|e| Error::Geopackage(e.to_string()))?;
    for coord in &line.0 {
        out.write_f64::<LittleEndian>(coord.x)
            .map_err(|e| Error::Geopackage(e.to_string()))?;
        out.write_f64::<LittleEndian>(coord.y)
            .map_err(|e| Error::Geopackage(e.to_string()))?;
    }
    Ok(())
}

fn write_wkb_polygon(out: &mut Vec<u8>, polygon: &Polygon<f64>, declared: GpkgGeometry) -> Result<()> {
    out.push(1); // little endian
    out.write_u32::<LittleEndian>(declared.wkb_code())
        .map_err(|e| Error::Geopackage(e.to_string()))?;

    let ring_count = 1 + polygon.interiors().len();
    out.write_u32::<LittleEndian>(ring_count as u32)
        .map_err(|e| Error::Geopackage(e.to_string()))?;

    write_wkb_ring(out, polygon.exterior())?;
    for interior in polygon.interiors() {
        write_wkb_ring(out, interior)?;
    }
    Ok(())
}

fn write_wkb_ring(out: &mut Vec<u8>, ring: &LineString<f64>) -> Result<()> {
    out.write_u32::<LittleEndian>(ring.0.len() as u32)
        .map_err(|e| Error::Geopackage(e.to_string()))?;
    for coord in &ring.0 {
        out.write_f64::<LittleEndian>(coord.x)
            .map_err(|e| Error::Geopackage(e.to_string()))?;
        out.write_f64::<LittleEndian>(coord.y)
            .map_err(|e| Error::Geopackage(e.to_string()))?;
    }
    Ok(())
}

fn geometry_envelope(geom: &Geometry<f64>) -> Option<[f64; 4]> {
    let mut envelope: Option<[f64; 4]> = None;
    let mut extend = |x: f64, y: f64| match envelope.as_mut() {
        Some([min_x, min_y, max_x, max_y]) => {
            *min_x = min_x.min(x);
            *min_y = min_y.min(y);
            *max_x = max_x.max(x);
            *max_y = max_y.max(y);
        }
        None => envelope = Some([x, y, x, y]),
    };

    match geom {
        Geometry::LineString(line) => {
            for coord in &line.0 {
                extend(coord.x, coord.y);
            }
        }
        Geometry::Polygon(polygon) => {
            for coord in &polygon.exterior().0 {
                extend(coord.x, coord.y);
            }
            for interior in polygon.interiors() {
                for coord in &interior.0 {
                    extend(coord.x, coord.y);
                }
            }
        }
        _ => return None,
    }
    envelope
}

fn collection_envelope(collection: &FeatureCollection) -> Option<[f64; 4]> {
    let mut total: Option<[f64; 4]> = None;
    for feature in collection.iter() {
        let Some(geom) = &feature.geometry else { continue };
        let Some([min_x, min_y, max_x, max_y]) = geometry_envelope(geom) else { continue };
        total = Some(match total {
            Some([tmin_x, tmin_y, tmax_x, tmax_y]) => [
                tmin_x.min(min_x),
                tmin_y.min(min_y),
                tmax_x.max(max_x),
                tmax_y.max(max_y),
            ],
            None => [min_x, min_y, max_x, max_y],
        });
    }
    total
}
