//! Parser for X-Plane's apt.dat airport database.
//!
//! The apt.dat format is a line-based text format where:
//! - Line codes `1`, `16` and `17` start an airport, seaplane base or heliport
//!   with elevation, ICAO and name
//! - Line code `100` defines a land runway with both threshold ends
//! - Line code `101` defines a water runway
//! - Line code `1302` carries metadata such as `datum_lat`/`datum_lon`
//! - Line code `99` ends the file
//!
//! Everything else (taxiways, frequencies, signs...) is skipped. A garbled
//! runway line only loses that runway.

use std::io::{BufRead, BufReader, Read};

use tracing::debug;

use super::{RunwayEnd, RunwaySegment, SurfaceType};
use crate::geo::{GeoPoint, METERS_PER_FOOT};

/// One airport with all of its runways
#[derive(Debug, Clone)]
pub struct AirportRecord {
    pub icao: String,
    pub name: String,
    /// Field elevation in meters
    pub elevation: f64,
    /// Reference point from metadata, if given
    pub datum: Option<(f64, f64)>,
    pub runways: Vec<RunwaySegment>,
}

/// Counters kept while parsing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseStats {
    pub lines: usize,
    pub airports: usize,
    pub runways: usize,
    /// Records dropped because of missing or garbled fields
    pub skipped: usize,
}

/// Parser for X-Plane apt.dat format.
pub struct AptDatParser;

impl AptDatParser {
    /// Stream airports from an apt.dat reader.
    pub fn parse<R: Read>(reader: R) -> AptDatIterator<BufReader<R>> {
        AptDatIterator::new(BufReader::new(reader))
    }

    /// Parse all airports into a vector.
    pub fn parse_all<R: Read>(reader: R) -> std::io::Result<(Vec<AirportRecord>, ParseStats)> {
        let mut iter = Self::parse(reader);
        let mut airports = Vec::new();
        for result in iter.by_ref() {
            airports.push(result?);
        }
        Ok((airports, iter.stats()))
    }
}

/// Iterator that yields airports from an apt.dat file.
pub struct AptDatIterator<R: BufRead> {
    reader: R,
    line_buffer: Vec<u8>,
    stats: ParseStats,
    current: Option<AirportRecord>,
    datum_lat: Option<f64>,
    datum_lon: Option<f64>,
    done: bool,
}

impl<R: BufRead> AptDatIterator<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            line_buffer: Vec::new(),
            stats: ParseStats::default(),
            current: None,
            datum_lat: None,
            datum_lon: None,
            done: false,
        }
    }

    pub fn stats(&self) -> ParseStats {
        self.stats
    }

    fn finalize_airport(&mut self) -> Option<AirportRecord> {
        let datum = self.datum_lat.take().zip(self.datum_lon.take());
        let mut airport = self.current.take()?;
        airport.datum = datum;
        self.stats.airports += 1;
        self.stats.runways += airport.runways.len();
        Some(airport)
    }

    fn skip(&mut self, what: &str) {
        self.stats.skipped += 1;
        debug!("Skipping malformed {} at line {}", what, self.stats.lines);
    }

    /// Parse an airport header line (row code 1, 16 or 17).
    ///
    /// Format: `1 <elevation_ft> <deprecated> <deprecated> <ICAO> <name...>`
    fn parse_airport_header(line: &str) -> Option<AirportRecord> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 5 {
            return None;
        }
        let elevation_ft: f64 = parts[1].parse().ok().filter(|e: &f64| e.is_finite())?;

        Some(AirportRecord {
            icao: parts[4].to_string(),
            name: parts[5..].join(" "),
            elevation: elevation_ft * METERS_PER_FOOT,
            datum: None,
            runways: Vec::new(),
        })
    }

    /// Parse a land runway line (row code 100).
    ///
    /// `100 <width> <surface> <shoulder> <smoothness> <centre lights> <edge lights> <signs>`
    /// followed by two blocks of
    /// `<id> <lat> <lon> <displaced> <overrun> <markings> <approach lights> <tdz> <reil>`
    fn parse_land_runway(line: &str, airport: &AirportRecord) -> Option<RunwaySegment> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 20 {
            return None;
        }
        let width = parse_number(parts[1])?;
        let surface = SurfaceType::from_code(parts[2].parse().ok()?);
        let end1 = parse_end(&parts[8..], airport.elevation)?;
        let end2 = parse_end(&parts[17..], airport.elevation)?;
        Some(RunwaySegment::new(&airport.icao, [end1, end2], width, surface))
    }

    /// Parse a water runway line (row code 101).
    ///
    /// `101 <width> <buoys> <id1> <lat1> <lon1> <id2> <lat2> <lon2>`
    fn parse_water_runway(line: &str, airport: &AirportRecord) -> Option<RunwaySegment> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 9 {
            return None;
        }
        let width = parse_number(parts[1])?;
        let end = |i: usize| -> Option<RunwayEnd> {
            let lat = parse_coord(parts[i + 1], 90.0)?;
            let lon = parse_coord(parts[i + 2], 180.0)?;
            Some(RunwayEnd {
                designator: parts[i].to_string(),
                threshold: GeoPoint::new(lat, lon, airport.elevation),
                displaced: 0.0,
            })
        };
        Some(RunwaySegment::new(
            &airport.icao,
            [end(3)?, end(6)?],
            width,
            SurfaceType::Water,
        ))
    }

    /// Metadata line (row code 1302), only the datum is of interest
    fn parse_metadata(&mut self, line: &str) {
        let parts: Vec<&str> = line.splitn(3, char::is_whitespace).collect();
        if parts.len() < 3 || self.current.is_none() {
            return;
        }
        let value = parts[2].trim();
        match parts[1] {
            "datum_lat" => self.datum_lat = parse_coord(value, 90.0),
            "datum_lon" => self.datum_lon = parse_coord(value, 180.0),
            _ => {}
        }
    }
}

fn parse_number(s: &str) -> Option<f64> {
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn parse_coord(s: &str, limit: f64) -> Option<f64> {
    parse_number(s).filter(|v| (-limit..=limit).contains(v))
}

/// One runway end block: id, lat, lon, displaced threshold
fn parse_end(parts: &[&str], elevation: f64) -> Option<RunwayEnd> {
    let lat = parse_coord(parts.get(1)?, 90.0)?;
    let lon = parse_coord(parts.get(2)?, 180.0)?;
    let displaced = match parts.get(3) {
        Some(s) => parse_number(s)?.max(0.0),
        None => 0.0,
    };
    Some(RunwayEnd {
        designator: parts.first()?.to_string(),
        threshold: GeoPoint::new(lat, lon, elevation),
        displaced,
    })
}

impl<R: BufRead> Iterator for AptDatIterator<R> {
    type Item = std::io::Result<AirportRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            self.line_buffer.clear();
            // Names may be Latin-1; decode lossily instead of failing the file
            match self.reader.read_until(b'\n', &mut self.line_buffer) {
                Ok(0) => {
                    self.done = true;
                    return self.finalize_airport().map(Ok);
                }
                Ok(_) => {
                    self.stats.lines += 1;
                    let line = String::from_utf8_lossy(&self.line_buffer).into_owned();
                    let line = line.trim();
                    if line.is_empty() || line.starts_with('#') {
                        continue;
                    }

                    let row_code = line.split_whitespace().next().unwrap_or("");
                    match row_code {
                        "1" | "16" | "17" => {
                            let previous = self.finalize_airport();
                            match Self::parse_airport_header(line) {
                                Some(airport) => self.current = Some(airport),
                                None => self.skip("airport header"),
                            }
                            if let Some(airport) = previous {
                                return Some(Ok(airport));
                            }
                        }
                        "100" | "101" => {
                            let Some(airport) = self.current.as_ref() else {
                                self.skip("runway outside airport");
                                continue;
                            };
                            let runway = if row_code == "100" {
                                Self::parse_land_runway(line, airport)
                            } else {
                                Self::parse_water_runway(line, airport)
                            };
                            match runway {
                                Some(rwy) => {
                                    if let Some(airport) = self.current.as_mut() {
                                        airport.runways.push(rwy);
                                    }
                                }
                                None => self.skip("runway"),
                            }
                        }
                        "1302" => self.parse_metadata(line),
                        "99" => {
                            self.done = true;
                            return self.finalize_airport().map(Ok);
                        }
                        _ => {
                            // Taxiways, ATC, signs, header lines - ignore
                        }
                    }
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const APT_DAT: &str = r#"
I
1100 Version - generated

1 1500 0 0 LFBO Toulouse-Blagnac
1302 datum_lat 43.6294
1302 datum_lon 1.3678
100 45.00 1 0 0.25 0 0 0 14L 43.6100 1.3500 120 0 0 0 0 2 32R 43.6400 1.3800 0 0 0 0 0 2
110 2 0.25 0.00 Taxiway
100 45.00 1 0 0.25 0 0 0 14R 43.6xx 1.3500 0 0 0 0 0 2 32L 43.6400 1.3800 0 0 0 0 0 2

16 0 0 0 SEA1 Seaplane Base
101 49 1 08 47.5000 -122.3000 26 47.5000 -122.2800

9999 unknown record type
1 13 0 0 KJFK John F Kennedy Intl
100 60.00 2 0 0.25 0 0 0 04L 40.6220 -73.7856 0 0 0 0 0 2 22R 40.6453 -73.7698 0 0 0 0 0 2

99
"#;

    #[test]
    fn test_parse_runways_and_skip_malformed() {
        let (airports, stats) = AptDatParser::parse_all(APT_DAT.as_bytes()).unwrap();
        assert_eq!(airports.len(), 3);
        assert_eq!(stats.airports, 3);
        assert_eq!(stats.runways, 3);
        assert_eq!(stats.skipped, 1);

        let lfbo = &airports[0];
        assert_eq!(lfbo.icao, "LFBO");
        assert_eq!(lfbo.name, "Toulouse-Blagnac");
        assert!((lfbo.elevation - 457.2).abs() < 0.01);
        assert_eq!(lfbo.datum, Some((43.6294, 1.3678)));
        assert_eq!(lfbo.runways.len(), 1);

        let rwy = &lfbo.runways[0];
        assert_eq!(rwy.designator(), "14L/32R");
        assert_eq!(rwy.ends[0].displaced, 120.0);
        assert_eq!(rwy.width, 45.0);
        assert_eq!(rwy.surface, SurfaceType::Asphalt);
        assert!((rwy.ends[1].threshold.alt - 457.2).abs() < 0.01);
    }

    #[test]
    fn test_parse_water_runway() {
        let (airports, _) = AptDatParser::parse_all(APT_DAT.as_bytes()).unwrap();
        let sea = &airports[1];
        assert_eq!(sea.icao, "SEA1");
        assert_eq!(sea.runways.len(), 1);
        assert_eq!(sea.runways[0].surface, SurfaceType::Water);
        assert!((sea.runways[0].heading - 90.0).abs() < 0.5);
    }

    #[test]
    fn test_truncated_runway_line_skipped() {
        let apt_dat = "1 100 0 0 XXXX Test\n100 45.00 1 0 0.25 0 0 0 09 50.0 8.0\n99\n";
        let (airports, stats) = AptDatParser::parse_all(apt_dat.as_bytes()).unwrap();
        assert_eq!(airports.len(), 1);
        assert!(airports[0].runways.is_empty());
        assert_eq!(stats.skipped, 1);
    }

    #[test]
    fn test_missing_end_marker() {
        let apt_dat = "1 100 0 0 XXXX Test\n100 45.00 1 0 0.25 0 0 0 09 50.0 8.0 0 0 0 0 0 0 27 50.0 8.05 0 0 0 0 0 0\n";
        let (airports, _) = AptDatParser::parse_all(apt_dat.as_bytes()).unwrap();
        assert_eq!(airports.len(), 1);
        assert_eq!(airports[0].runways.len(), 1);
    }

    #[test]
    fn test_latin1_name_does_not_stop_parsing() {
        let mut apt_dat: Vec<u8> = b"1 300 0 0 WEST Caf".to_vec();
        apt_dat.push(0xe9);
        apt_dat.extend_from_slice(b" Field
");
        apt_dat.extend_from_slice(
            b"1 1000 0 0 EAST East
100 45.00 1 0 0.25 0 0 0 09 47.5 8.5 0 0 0 0 0 2 27 47.5 8.54 0 0 0 0 0 2
99
",
        );

        let (airports, stats) = AptDatParser::parse_all(apt_dat.as_slice()).unwrap();
        assert_eq!(airports.len(), 2);
        assert_eq!(airports[0].icao, "WEST");
        assert!(airports[0].name.starts_with("Caf"));
        assert_eq!(airports[1].runways.len(), 1);
        assert_eq!(stats.skipped, 0);
    }
}
