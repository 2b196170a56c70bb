use thiserror::Error;

use crate::pool::SpanKey;

/// The number of bits available to [`Span::min`] and [`Span::max`].
pub const SPAN_HEIGHT_BITS: u32 = 13;

/// Defines the maximum value for [`Span::min`] and [`Span::max`].
pub const SPAN_MAX_HEIGHT: u16 = (1 << SPAN_HEIGHT_BITS) - 1;

/// The number of bits available to an [`AreaType`].
pub const AREA_BITS: u32 = 6;

/// Corresponds to <https://github.com/recastnavigation/recastnavigation/blob/bd98d84c274ee06842bf51a4088ca82ac71f8c2d/Recast/Include/Recast.h#L294>
/// Build with [`SpanBuilder`]
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Span {
    /// Height of the floor. `[Limit: < max]`
    ///
    /// Original uses 13 bits, we store a `u16` and validate the range instead.
    min: u16,
    /// Height of the ceiling. `[Limit: <= SPAN_MAX_HEIGHT]`
    ///
    /// Original uses 13 bits, we store a `u16` and validate the range instead.
    max: u16,
    /// Area type ID.
    ///
    /// Original uses 6 bits, [`AreaType`] validates the range instead.
    area: AreaType,
    /// The key of the next-higher span in the column
    next: Option<SpanKey>,
}

impl Span {
    /// Creates a span from values that are already known to be in range.
    #[inline]
    pub(crate) fn from_quantized(min: u16, max: u16, area: AreaType) -> Self {
        debug_assert!(min < max, "span floor {min} must be below its ceiling {max}");
        debug_assert!(max <= SPAN_MAX_HEIGHT);
        Self {
            min,
            max,
            area,
            next: None,
        }
    }

    /// The contents of a slot that sits in the free list of the span pool.
    #[inline]
    pub(crate) fn vacant(next: Option<SpanKey>) -> Self {
        Self {
            min: 0,
            max: 0,
            area: AreaType::NOT_WALKABLE,
            next,
        }
    }

    /// Height of the floor in cell units.
    #[inline]
    pub fn min(&self) -> u16 {
        self.min
    }

    #[inline]
    pub(crate) fn set_min(&mut self, min: u16) {
        self.min = min;
    }

    /// Height of the ceiling in cell units.
    #[inline]
    pub fn max(&self) -> u16 {
        self.max
    }

    #[inline]
    pub(crate) fn set_max(&mut self, max: u16) {
        self.max = max;
    }

    /// The area type of the span.
    #[inline]
    pub fn area(&self) -> AreaType {
        self.area
    }

    #[inline]
    pub(crate) fn set_area(&mut self, area: AreaType) {
        self.area = area;
    }

    /// The key of the next-higher span in the column, if any.
    #[inline]
    pub fn next(&self) -> Option<SpanKey> {
        self.next
    }

    #[inline]
    pub(crate) fn set_next(&mut self, next: impl Into<Option<SpanKey>>) {
        self.next = next.into();
    }
}

/// A builder for [`Span`]s. Validates the ranges of the values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanBuilder {
    /// Height of the floor in cell units. `[Limit: < max]`
    pub min: u16,
    /// Height of the ceiling in cell units. `[Limit: <= SPAN_MAX_HEIGHT]`
    pub max: u16,
    /// Area type of the span
    pub area: AreaType,
}

impl SpanBuilder {
    /// Builds the span.
    pub fn build(self) -> Result<Span, SpanError> {
        if self.max > SPAN_MAX_HEIGHT {
            return Err(SpanError::HeightOutOfRange { height: self.max });
        }
        if self.min >= self.max {
            return Err(SpanError::EmptyInterval {
                min: self.min,
                max: self.max,
            });
        }
        Ok(Span::from_quantized(self.min, self.max, self.area))
    }
}

/// Errors that can occur when building a [`Span`] or an [`AreaType`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpanError {
    /// Happens when a span height does not fit into [`SPAN_HEIGHT_BITS`] bits.
    #[error("span height {height} is above the maximum of {max}", max = SPAN_MAX_HEIGHT)]
    HeightOutOfRange {
        /// The offending height
        height: u16,
    },
    /// Happens when the floor of a span is not below its ceiling.
    #[error("span floor {min} must be below its ceiling {max}")]
    EmptyInterval {
        /// The floor of the span
        min: u16,
        /// The ceiling of the span
        max: u16,
    },
    /// Happens when an area id does not fit into [`AREA_BITS`] bits.
    #[error("area id {id} is above the maximum of {max}", max = AreaType::MAX.0)]
    AreaOutOfRange {
        /// The offending area id
        id: u8,
    },
}

/// The area type of a span. Higher ids take priority when spans are merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "bevy_reflect", derive(bevy_reflect::Reflect))]
pub struct AreaType(pub(crate) u8);

impl AreaType {
    /// The area type 0. Triangles with this area type are not walkable.
    pub const NOT_WALKABLE: Self = Self(0);
    /// The highest area id that fits into [`AREA_BITS`] bits.
    pub const MAX: Self = Self((1 << AREA_BITS) - 1);
    /// Default area type for walkable triangles. The highest possible area type.
    pub const DEFAULT_WALKABLE: Self = Self::MAX;

    /// Creates an area type, failing if `id` does not fit into [`AREA_BITS`] bits.
    #[inline]
    pub const fn new(id: u8) -> Result<Self, SpanError> {
        if id > Self::MAX.0 {
            return Err(SpanError::AreaOutOfRange { id });
        }
        Ok(Self(id))
    }

    /// Creates an area type, clamping `id` to [`AreaType::MAX`].
    #[inline]
    pub const fn saturating(id: u8) -> Self {
        if id > Self::MAX.0 { Self::MAX } else { Self(id) }
    }

    /// The raw area id.
    #[inline]
    pub const fn id(self) -> u8 {
        self.0
    }

    /// Whether the area type is walkable, i.e. not [`AreaType::NOT_WALKABLE`].
    #[inline]
    pub const fn is_walkable(self) -> bool {
        self.0 != Self::NOT_WALKABLE.0
    }
}
