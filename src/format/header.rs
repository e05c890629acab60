//! Main header bookkeeping.
//!
//! The main header runs from SOC to the first SOT. SIZ, COD and QCD must
//! each appear exactly once in it; CAP and COM are optional and everything
//! else is passed through without interpretation.

use super::marker::Marker;
use super::segment::{
    CapSegment, CodSegment, ProgressionOrder, QcdSegment, Segment, SegmentBody, SizSegment,
};
use crate::error::CodestreamError;

/// Decoded main header of a codestream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodestreamHeader {
    pub siz: SizSegment,
    pub cod: CodSegment,
    pub qcd: QcdSegment,
    pub cap: Option<CapSegment>,

    /// Latin-1 comments in order of appearance
    pub comments: Vec<String>,

    /// Offset of the first SOT marker (size of the main header in bytes)
    pub length: usize,
}

impl CodestreamHeader {
    /// Width of component 0.
    pub fn width(&self) -> u32 {
        self.siz.component_width(0).unwrap_or(0)
    }

    /// Height of component 0.
    pub fn height(&self) -> u32 {
        self.siz.component_height(0).unwrap_or(0)
    }

    pub fn bit_depth(&self) -> u8 {
        self.siz.bit_depth(0).unwrap_or(0)
    }

    pub fn is_signed(&self) -> bool {
        self.siz.is_signed(0).unwrap_or(false)
    }

    pub fn component_count(&self) -> usize {
        self.siz.component_count()
    }

    pub fn decomposition_levels(&self) -> u8 {
        self.cod.decomposition_levels
    }

    pub fn is_reversible(&self) -> bool {
        self.cod.is_reversible()
    }

    pub fn progression_order(&self) -> ProgressionOrder {
        self.cod.progression_order
    }

    pub fn tile_count(&self) -> u64 {
        self.siz.tile_count()
    }
}

/// Collects main header segments until the first SOT.
#[derive(Debug, Default)]
pub(crate) struct HeaderBuilder {
    siz: Option<SizSegment>,
    cod: Option<CodSegment>,
    qcd: Option<QcdSegment>,
    cap: Option<CapSegment>,
    comments: Vec<String>,
}

impl HeaderBuilder {
    /// Record a main header segment, rejecting duplicates of the unique ones.
    pub fn record(&mut self, segment: &Segment) -> Result<(), CodestreamError> {
        fn set_once<T: Clone>(
            slot: &mut Option<T>,
            value: &T,
            marker: Marker,
        ) -> Result<(), CodestreamError> {
            if slot.is_some() {
                return Err(CodestreamError::DuplicateSegment(marker.name()));
            }
            *slot = Some(value.clone());
            Ok(())
        }

        match &segment.body {
            SegmentBody::Siz(siz) => set_once(&mut self.siz, siz, Marker::Siz),
            SegmentBody::Cod(cod) => set_once(&mut self.cod, cod, Marker::Cod),
            SegmentBody::Qcd(qcd) => set_once(&mut self.qcd, qcd, Marker::Qcd),
            SegmentBody::Cap(cap) => set_once(&mut self.cap, cap, Marker::Cap),
            SegmentBody::Com(com) => {
                if let Some(text) = &com.text {
                    self.comments.push(text.clone());
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Finish the main header when the first SOT is found at `length`.
    pub fn finish(&mut self, length: usize) -> Result<CodestreamHeader, CodestreamError> {
        let siz = self
            .siz
            .take()
            .ok_or(CodestreamError::MissingSegment(Marker::Siz.name()))?;
        let cod = self
            .cod
            .take()
            .ok_or(CodestreamError::MissingSegment(Marker::Cod.name()))?;
        let qcd = self
            .qcd
            .take()
            .ok_or(CodestreamError::MissingSegment(Marker::Qcd.name()))?;
        Ok(CodestreamHeader {
            siz,
            cod,
            qcd,
            cap: self.cap.take(),
            comments: std::mem::take(&mut self.comments),
            length,
        })
    }
}
