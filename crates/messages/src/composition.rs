//! Composition data page 0 codec.
//!
//! ```text
//! header:  CID(2) PID(2) VID(2) CRPL(2) Features(2)
//! element: Loc(2) NumS(1) NumV(1) SIG[NumS](2) Vendor[NumV](4)
//! ```
//!
//! All fields are little-endian. Vendor models are encoded company id first.

use meshctl_types::{CompositionData, ElementComposition, Features, ModelId};
use thiserror::Error;

const HEADER_LEN: usize = 10;
const ELEMENT_HEADER_LEN: usize = 4;

/// Largest element count a node can report (one address per element).
pub const MAX_ELEMENTS: usize = 255;

/// Errors parsing composition data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompositionError {
    #[error("Only composition page 0 is supported, got page {0}")]
    UnsupportedPage(u8),

    #[error("Composition data truncated at offset {offset}: need {needed} bytes, have {available}")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("Composition data has no elements")]
    NoElements,

    #[error("Composition data has too many elements")]
    TooManyElements,
}

struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CompositionError> {
        if self.remaining() < n {
            return Err(CompositionError::Truncated {
                offset: self.offset,
                needed: n,
                available: self.remaining(),
            });
        }
        let slice = &self.data[self.offset..self.offset + n];
        self.offset += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, CompositionError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, CompositionError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }
}

/// Parse a composition data page.
pub fn parse_composition(page: u8, data: &[u8]) -> Result<CompositionData, CompositionError> {
    if page != 0 {
        return Err(CompositionError::UnsupportedPage(page));
    }
    let mut r = Reader::new(data);
    if r.remaining() < HEADER_LEN {
        return Err(CompositionError::Truncated {
            offset: 0,
            needed: HEADER_LEN,
            available: r.remaining(),
        });
    }
    let company_id = r.u16()?;
    let product_id = r.u16()?;
    let version_id = r.u16()?;
    let replay_cache = r.u16()?;
    let features = Features::from_bits(r.u16()?);

    let mut elements = Vec::new();
    while r.remaining() > 0 {
        if r.remaining() < ELEMENT_HEADER_LEN {
            return Err(CompositionError::Truncated {
                offset: r.offset,
                needed: ELEMENT_HEADER_LEN,
                available: r.remaining(),
            });
        }
        if elements.len() == MAX_ELEMENTS {
            return Err(CompositionError::TooManyElements);
        }
        let location = r.u16()?;
        let num_sig = r.u8()? as usize;
        let num_vendor = r.u8()? as usize;

        let mut models = Vec::with_capacity(num_sig + num_vendor);
        for _ in 0..num_sig {
            models.push(ModelId::Sig(r.u16()?));
        }
        for _ in 0..num_vendor {
            let company = r.u16()?;
            let model = r.u16()?;
            models.push(ModelId::Vendor { company, model });
        }
        elements.push(ElementComposition { location, models });
    }

    if elements.is_empty() {
        return Err(CompositionError::NoElements);
    }

    Ok(CompositionData {
        company_id,
        product_id,
        version_id,
        replay_cache,
        features,
        elements,
    })
}

/// Encode composition data as page 0.
pub fn encode_composition(comp: &CompositionData) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + comp.elements.len() * 8);
    for v in [
        comp.company_id,
        comp.product_id,
        comp.version_id,
        comp.replay_cache,
        comp.features.to_bits(),
    ] {
        out.extend_from_slice(&v.to_le_bytes());
    }
    for element in &comp.elements {
        let sig: Vec<u16> = element.models.iter().filter_map(|m| m.sig_id()).collect();
        let vendor: Vec<(u16, u16)> = element
            .models
            .iter()
            .filter_map(|m| match m {
                ModelId::Vendor { company, model } => Some((*company, *model)),
                ModelId::Sig(_) => None,
            })
            .collect();
        out.extend_from_slice(&element.location.to_le_bytes());
        out.push(sig.len() as u8);
        out.push(vendor.len() as u8);
        for id in sig {
            out.extend_from_slice(&id.to_le_bytes());
        }
        for (company, model) in vendor {
            out.extend_from_slice(&company.to_le_bytes());
            out.extend_from_slice(&model.to_le_bytes());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    // Light with a config server, an on/off server and a vendor model, plus a
    // second element with a level server.
    const LAMP: &[u8] = &[
        0x59, 0x00, // CID
        0x01, 0x00, // PID
        0x02, 0x00, // VID
        0x0A, 0x00, // CRPL
        0x03, 0x00, // relay + proxy
        0x00, 0x01, 0x02, 0x01, // element 0: loc 0x0100, 2 SIG, 1 vendor
        0x00, 0x00, // config server
        0x00, 0x10, // onoff server
        0x59, 0x00, 0x34, 0x12, // vendor 0059:1234
        0x02, 0x01, 0x01, 0x00, // element 1: loc 0x0102, 1 SIG
        0x02, 0x10, // level server
    ];

    #[test]
    fn test_parse_page0() {
        let comp = parse_composition(0, LAMP).unwrap();
        assert_eq!(comp.company_id, 0x0059);
        assert_eq!(comp.replay_cache, 10);
        assert!(comp.features.relay && comp.features.proxy);
        assert_eq!(comp.element_count(), 2);
        assert_eq!(comp.elements[0].location, 0x0100);
        assert_eq!(
            comp.elements[0].models,
            vec![
                ModelId::Sig(0x0000),
                ModelId::Sig(0x1000),
                ModelId::Vendor {
                    company: 0x0059,
                    model: 0x1234
                }
            ]
        );
        assert_eq!(comp.elements[1].models, vec![ModelId::Sig(0x1002)]);
        assert_eq!(encode_composition(&comp), LAMP);
    }

    #[test]
    fn test_truncated_element() {
        let err = parse_composition(0, &LAMP[..LAMP.len() - 1]).unwrap_err();
        assert!(matches!(err, CompositionError::Truncated { .. }));
    }

    #[test]
    fn test_header_only() {
        assert_eq!(
            parse_composition(0, &LAMP[..HEADER_LEN]),
            Err(CompositionError::NoElements)
        );
    }

    #[test]
    fn test_other_pages_rejected() {
        assert_eq!(
            parse_composition(1, LAMP),
            Err(CompositionError::UnsupportedPage(1))
        );
    }
}
