/// Units of measurement for a metric's values.
///
/// Serialized as an enumeration on every data record. [`Units::as_str`] gives the UCUM-style spelling used by
/// collectors that expect textual units.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum Units {
    /// Units were not specified.
    Unknown = 0,
    /// Seconds.
    Seconds = 1,
    /// Milliseconds.
    Milliseconds = 2,
    /// Microseconds.
    Microseconds = 3,
    /// Nanoseconds.
    Nanoseconds = 4,
    /// Bits.
    Bits = 21,
    /// Bytes.
    Bytes = 22,
    /// Kilobytes (10^3 bytes).
    Kilobytes = 31,
    /// Megabytes (10^6 bytes).
    Megabytes = 32,
    /// Gigabytes (10^9 bytes).
    Gigabytes = 33,
    /// Kibibytes (2^10 bytes).
    Kibibytes = 41,
    /// Mebibytes (2^20 bytes).
    Mebibytes = 42,
    /// Gibibytes (2^30 bytes).
    Gibibytes = 43,
    /// Amperes.
    Amps = 60,
    /// Milliamperes.
    Milliamps = 61,
    /// Degrees Celsius.
    DegreesCelsius = 62,
}

impl Units {
    /// Returns the UCUM-style string for these units.
    pub fn as_str(&self) -> &'static str {
        match self {
            Units::Unknown => "{unknown}",
            Units::Seconds => "s",
            Units::Milliseconds => "ms",
            Units::Microseconds => "us",
            Units::Nanoseconds => "ns",
            Units::Bits => "bit",
            Units::Bytes => "By",
            Units::Kilobytes => "kBy",
            Units::Megabytes => "MBy",
            Units::Gigabytes => "GBy",
            Units::Kibibytes => "kiBy",
            Units::Mebibytes => "MiBy",
            Units::Gibibytes => "GiBy",
            Units::Amps => "A",
            Units::Milliamps => "mA",
            Units::DegreesCelsius => "Cel",
        }
    }
}
