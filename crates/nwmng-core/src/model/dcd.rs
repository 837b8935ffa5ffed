// ── Device composition data (page 0) ──
//
// Little-endian layout: CID, PID, VID, CRPL, features (u16 each), then
// elements until the buffer ends. Each element is `loc u16, NumS u8,
// NumV u8`, NumS SIG model ids (u16) and NumV (company u16, model u16).

use nwmng_ncp::ModelRef;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

const HEADER_LEN: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    pub loc: u16,
    pub sig_models: Vec<u16>,
    pub vendor_models: Vec<ModelRef>,
}

impl Element {
    pub fn model_count(&self) -> usize {
        self.sig_models.len() + self.vendor_models.len()
    }

    /// SIG models come first, vendor models after them.
    pub fn model(&self, index: usize) -> Option<ModelRef> {
        let sig = self.sig_models.len();
        if index < sig {
            self.sig_models.get(index).copied().map(ModelRef::sig)
        } else {
            self.vendor_models.get(index - sig).copied()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dcd {
    pub cid: u16,
    pub pid: u16,
    pub vid: u16,
    pub crpl: u16,
    pub features: u16,
    pub elements: Vec<Element>,
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn u8(&mut self) -> Result<u8, CoreError> {
        let b = *self.buf.get(self.pos).ok_or_else(|| truncated(self.pos))?;
        self.pos += 1;
        Ok(b)
    }

    fn u16(&mut self) -> Result<u16, CoreError> {
        let lo = self.u8()?;
        let hi = self.u8()?;
        Ok(u16::from_le_bytes([lo, hi]))
    }
}

fn truncated(offset: usize) -> CoreError {
    CoreError::Format {
        message: format!("composition data truncated at byte {offset}"),
    }
}

impl Dcd {
    pub fn decode(data: &[u8]) -> Result<Self, CoreError> {
        if data.len() < HEADER_LEN {
            return Err(truncated(data.len()));
        }
        let mut r = Reader::new(data);
        let cid = r.u16()?;
        let pid = r.u16()?;
        let vid = r.u16()?;
        let crpl = r.u16()?;
        let features = r.u16()?;

        let mut elements = Vec::new();
        while r.remaining() > 0 {
            let loc = r.u16()?;
            let num_s = r.u8()?;
            let num_v = r.u8()?;
            let sig_models = (0..num_s)
                .map(|_| r.u16())
                .collect::<Result<Vec<_>, _>>()?;
            let vendor_models = (0..num_v)
                .map(|_| Ok(ModelRef::vendor(r.u16()?, r.u16()?)))
                .collect::<Result<Vec<_>, CoreError>>()?;
            elements.push(Element {
                loc,
                sig_models,
                vendor_models,
            });
        }

        if elements.is_empty() {
            return Err(CoreError::Format {
                message: "composition data lists no elements".into(),
            });
        }

        Ok(Self {
            cid,
            pid,
            vid,
            crpl,
            features,
            elements,
        })
    }

    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    /// Model `model` of element `element`, or `None` when out of range.
    pub fn model(&self, element: usize, model: usize) -> Option<ModelRef> {
        self.elements.get(element)?.model(model)
    }

    pub fn model_count(&self, element: usize) -> usize {
        self.elements.get(element).map_or(0, Element::model_count)
    }
}
