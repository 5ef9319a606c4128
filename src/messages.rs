//! The browser/renderer wire protocol
//!
//! One kind enum per message class plus the aggregate types that cross the
//! wire. The argument shape for each kind is listed next to its variant;
//! encoder and decoder sides are paired by hand against these lists.
//!
//! Direction conventions: `Process`/`Page`/`Drawing` flow browser ->
//! renderer; the `*Host` classes flow renderer -> browser. Page-scoped
//! messages carry the page id as the frame destination; process-scoped ones
//! use destination 0.

use crate::ipc::{ArgumentCoder, Decoder, Encoder, MessageClass, MessageKind};
use crate::utils::DecodeError;

macro_rules! message_kind {
    ($(#[$meta:meta])* $name:ident, $class:expr, { $($(#[$vmeta:meta])* $variant:ident = $value:literal,)+ }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($(#[$vmeta])* $variant = $value,)+
        }

        impl MessageKind for $name {
            const CLASS: MessageClass = $class;

            fn raw(self) -> u16 {
                self as u16
            }

            fn from_raw(raw: u16) -> Option<Self> {
                match raw {
                    $($value => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

message_kind!(
    /// Browser -> renderer, process scope (destination 0).
    ProcessKind,
    MessageClass::Process,
    {
        /// {page_id: u64, width: u32, height: u32}
        CreatePage = 1,
        /// {page_id: u64}
        ClosePage = 2,
        /// {} -- graceful shutdown request
        Close = 3,
    }
);

message_kind!(
    /// Renderer -> browser, process scope (destination 0).
    ProcessHostKind,
    MessageClass::ProcessHost,
    {
        /// {page_id: u64, item: BackForwardItemData} -- new item on commit
        AddBackForwardItem = 1,
        /// {page_id: u64, item_id: u64} -- committed an existing item
        WentToBackForwardItem = 2,
        /// {frame_id: u64} -- routed to its page via the proxy's frame map
        DidDestroyFrame = 3,
    }
);

message_kind!(
    /// Browser -> renderer, page scope (destination = page id).
    PageKind,
    MessageClass::Page,
    {
        /// {url: String}
        LoadUrl = 1,
        /// {}
        StopLoading = 2,
        /// {}
        Reload = 3,
        /// {item_id: u64}
        GoToBackForwardItem = 4,
        /// {listener_id: u64, action: PolicyAction}
        DidReceivePolicyDecision = 5,
        /// {script: String, callback_id: u64}
        RunJavaScript = 6,
        /// {frame_id: u64, callback_id: u64}
        GetSourceForFrame = 7,
        /// {callback_id: u64}
        GetRenderTree = 8,
        /// {factor: f64}
        SetPageZoom = 9,
        /// {factor: f64}
        SetTextZoom = 10,
        /// {event: MouseEventData}
        MouseEvent = 11,
        /// {event: KeyEventData}
        KeyEvent = 12,
        /// {command_id: u64}
        UnapplyEditCommand = 13,
        /// {command_id: u64}
        ReapplyEditCommand = 14,
    }
);

message_kind!(
    /// Renderer -> browser, page scope (destination = page id).
    PageHostKind,
    MessageClass::PageHost,
    {
        /// {frame_id: u64}
        DidCreateMainFrame = 1,
        /// {frame_id: u64, parent_frame_id: u64}
        DidCreateSubframe = 2,
        /// {frame_id: u64, url: String}
        DidStartProvisionalLoad = 3,
        /// {frame_id: u64, url: String}
        DidCommitLoad = 4,
        /// {frame_id: u64}
        DidFinishLoad = 5,
        /// {frame_id: u64, error: LoadError}
        DidFailLoad = 6,
        /// {frame_id: u64, title: String}
        DidReceiveTitle = 7,
        /// {frame_id: u64, listener_id: u64, url: String, navigation_type: NavigationType}
        DecidePolicyForNavigationAction = 8,
        /// {frame_id: u64, listener_id: u64, url: String}
        DecidePolicyForNewWindowAction = 9,
        /// {frame_id: u64, listener_id: u64, mime_type: String, url: String}
        DecidePolicyForMimeType = 10,
        /// {callback_id: u64, result: Option<String>}
        ScriptValueCallback = 11,
        /// {callback_id: u64, result: Option<String>}
        SourceCallback = 12,
        /// {callback_id: u64, result: Option<String>}
        RenderTreeCallback = 13,
        /// {command_id: u64, label: String}
        RegisterEditCommand = 14,
        /// {command_id: u64}
        UnregisterEditCommand = 15,
        /// {}
        ClearAllEditCommands = 16,
    }
);

message_kind!(
    /// Browser -> renderer drawing traffic (destination = page id).
    DrawingKind,
    MessageClass::Drawing,
    {
        /// {width: u32, height: u32} -- synchronous; reply: {chunk: UpdateChunk}
        SetSize = 1,
        /// {} -- acknowledge an Update chunk
        DidUpdate = 2,
    }
);

message_kind!(
    /// Renderer -> browser drawing traffic (destination = page id).
    DrawingHostKind,
    MessageClass::DrawingHost,
    {
        /// {chunk: UpdateChunk}
        Update = 1,
    }
);

/// Integer rectangle in page coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Smallest rect containing both. Edges are computed in u64 and the
    /// extent saturates at the end of the coordinate space, so no input
    /// pair can overflow.
    pub fn union(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = (u64::from(self.x) + u64::from(self.width))
            .max(u64::from(other.x) + u64::from(other.width));
        let bottom = (u64::from(self.y) + u64::from(self.height))
            .max(u64::from(other.y) + u64::from(other.height));
        Rect::new(
            x,
            y,
            (right - u64::from(x)).min(u64::from(u32::MAX)) as u32,
            (bottom - u64::from(y)).min(u64::from(u32::MAX)) as u32,
        )
    }

    /// Clamp to a surface of the given size. Edges are computed in u64;
    /// the clamped extents always fit back in u32.
    pub fn intersect_with_size(&self, width: u32, height: u32) -> Rect {
        let x = self.x.min(width);
        let y = self.y.min(height);
        let right = (u64::from(self.x) + u64::from(self.width)).min(u64::from(width));
        let bottom = (u64::from(self.y) + u64::from(self.height)).min(u64::from(height));
        Rect::new(
            x,
            y,
            right.saturating_sub(u64::from(x)) as u32,
            bottom.saturating_sub(u64::from(y)) as u32,
        )
    }

    /// Byte length of a tightly packed RGBA buffer covering this rect,
    /// or `None` when the area does not fit in 64 bits.
    pub fn rgba_len(&self) -> Option<u64> {
        u64::from(self.width)
            .checked_mul(u64::from(self.height))
            .and_then(|count| count.checked_mul(4))
    }
}

impl ArgumentCoder for Rect {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_u32(self.x);
        encoder.write_u32(self.y);
        encoder.write_u32(self.width);
        encoder.write_u32(self.height);
    }

    fn decode(decoder: &mut Decoder<'_>) -> Result<Self, DecodeError> {
        let rect = Rect {
            x: decoder.read_u32()?,
            y: decoder.read_u32()?,
            width: decoder.read_u32()?,
            height: decoder.read_u32()?,
        };
        // Reject rects whose far edges leave the u32 coordinate space.
        if rect.x.checked_add(rect.width).is_none() || rect.y.checked_add(rect.height).is_none() {
            return Err(DecodeError::InvalidValue("rect bounds"));
        }
        Ok(rect)
    }
}

/// A painted sub-rectangle: RGBA pixel rows for exactly `rect`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateChunk {
    pub rect: Rect,
    pub pixels: Vec<u8>,
}

impl UpdateChunk {
    pub fn new(rect: Rect, pixels: Vec<u8>) -> Self {
        debug_assert_eq!(
            Some(pixels.len() as u64),
            rect.rgba_len(),
            "chunk pixel buffer does not match its rect"
        );
        Self { rect, pixels }
    }
}

impl ArgumentCoder for UpdateChunk {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.encode(&self.rect);
        encoder.write_bytes(&self.pixels);
    }

    fn decode(decoder: &mut Decoder<'_>) -> Result<Self, DecodeError> {
        let rect = decoder.decode::<Rect>()?;
        let pixels = decoder.read_bytes()?;
        if rect.rgba_len() != Some(pixels.len() as u64) {
            return Err(DecodeError::InvalidValue("chunk pixel buffer"));
        }
        Ok(Self { rect, pixels })
    }
}

/// Canonical payload of one back-forward entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackForwardItemData {
    pub item_id: u64,
    pub original_url: String,
    pub url: String,
    pub title: String,
}

impl ArgumentCoder for BackForwardItemData {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_u64(self.item_id);
        encoder.write_str(&self.original_url);
        encoder.write_str(&self.url);
        encoder.write_str(&self.title);
    }

    fn decode(decoder: &mut Decoder<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            item_id: decoder.read_u64()?,
            original_url: decoder.read_str()?,
            url: decoder.read_str()?,
            title: decoder.read_str()?,
        })
    }
}

/// Application-level load failure; an ordinary notification payload, never
/// a channel error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadError {
    pub code: i32,
    pub description: String,
    pub url: String,
}

impl ArgumentCoder for LoadError {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_i32(self.code);
        encoder.write_str(&self.description);
        encoder.write_str(&self.url);
    }

    fn decode(decoder: &mut Decoder<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            code: decoder.read_i32()?,
            description: decoder.read_str()?,
            url: decoder.read_str()?,
        })
    }
}

/// UI decision for a pending policy listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PolicyAction {
    Use = 0,
    Download = 1,
    Ignore = 2,
}

impl ArgumentCoder for PolicyAction {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_u32(*self as u32);
    }

    fn decode(decoder: &mut Decoder<'_>) -> Result<Self, DecodeError> {
        match decoder.read_u32()? {
            0 => Ok(Self::Use),
            1 => Ok(Self::Download),
            2 => Ok(Self::Ignore),
            _ => Err(DecodeError::InvalidValue("policy action")),
        }
    }
}

/// What provoked a navigation, for policy decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum NavigationType {
    LinkClicked = 0,
    FormSubmitted = 1,
    BackForward = 2,
    Reload = 3,
    Other = 4,
}

impl ArgumentCoder for NavigationType {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_u32(*self as u32);
    }

    fn decode(decoder: &mut Decoder<'_>) -> Result<Self, DecodeError> {
        match decoder.read_u32()? {
            0 => Ok(Self::LinkClicked),
            1 => Ok(Self::FormSubmitted),
            2 => Ok(Self::BackForward),
            3 => Ok(Self::Reload),
            4 => Ok(Self::Other),
            _ => Err(DecodeError::InvalidValue("navigation type")),
        }
    }
}

/// Pointer event forwarded to the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MouseEventData {
    pub kind: MouseEventKind,
    pub x: i32,
    pub y: i32,
    pub button: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MouseEventKind {
    Move = 0,
    Down = 1,
    Up = 2,
}

impl MouseEventData {
    /// Pointer moves carry no user intent the renderer must act on; they do
    /// not arm the responsiveness check.
    pub fn is_passive(&self) -> bool {
        self.kind == MouseEventKind::Move
    }
}

impl ArgumentCoder for MouseEventData {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_u8(self.kind as u8);
        encoder.write_i32(self.x);
        encoder.write_i32(self.y);
        encoder.write_u8(self.button);
    }

    fn decode(decoder: &mut Decoder<'_>) -> Result<Self, DecodeError> {
        let kind = match decoder.read_u8()? {
            0 => MouseEventKind::Move,
            1 => MouseEventKind::Down,
            2 => MouseEventKind::Up,
            _ => return Err(DecodeError::InvalidValue("mouse event kind")),
        };
        Ok(Self {
            kind,
            x: decoder.read_i32()?,
            y: decoder.read_i32()?,
            button: decoder.read_u8()?,
        })
    }
}

/// Keyboard event forwarded to the renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEventData {
    pub kind: KeyEventKind,
    pub key_code: u32,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KeyEventKind {
    Down = 0,
    Up = 1,
}

impl ArgumentCoder for KeyEventData {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_u8(self.kind as u8);
        encoder.write_u32(self.key_code);
        encoder.write_str(&self.text);
    }

    fn decode(decoder: &mut Decoder<'_>) -> Result<Self, DecodeError> {
        let kind = match decoder.read_u8()? {
            0 => KeyEventKind::Down,
            1 => KeyEventKind::Up,
            _ => return Err(DecodeError::InvalidValue("key event kind")),
        };
        Ok(Self {
            kind,
            key_code: decoder.read_u32()?,
            text: decoder.read_str()?,
        })
    }
}
