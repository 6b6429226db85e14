//! Reading electronic passports (ICAO Doc 9303 machine-readable travel documents) over Basic
//! Access Control.
//!
//! The usual flow is:
//! 1. Build an [`mrz_key::MrzKey`] from the printed MRZ.
//! 2. Wrap a [`iso7816::card::SmartCard`] into a [`tag::MrtdTag`].
//! 3. Run [`bac::establish`] to set up Secure Messaging.
//! 4. Read files with [`reader::MrtdReader`].


pub mod bac;
pub mod crypt;
pub mod iso7816;
pub mod lds;
pub mod mrz;
pub mod mrz_key;
pub mod passport;
pub mod reader;
pub mod secure_messaging;
pub mod tag;
pub mod tlv;


/// Formats the buffer as a classic hex dump with offsets and an ASCII column.
pub fn hexdump(buf: &[u8]) -> String {
    let mut ret = String::new();
    for (line_index, line) in buf.chunks(16).enumerate() {
        if line_index > 0 {
            ret.push('\n');
        }
        ret.push_str(&format!("{:08X}  ", line_index * 16));

        for i in 0..16 {
            match line.get(i) {
                Some(b) => ret.push_str(&format!(" {:02X}", b)),
                None => ret.push_str("   "),
            }
        }

        ret.push_str(" |");
        for &b in line {
            if b >= b' ' && b <= b'~' {
                ret.push(char::from(b));
            } else {
                ret.push('.');
            }
        }
        ret.push('|');
    }
    ret
}
