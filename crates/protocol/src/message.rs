use crate::command::CustomCommand;
use tracing::debug;

/// First element of every message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    DomEvent = 0,
    Custom = 1,
    AttachCanvas = 2,
}

impl MessageKind {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub const ALL: [Self; 3] = [Self::DomEvent, Self::Custom, Self::AttachCanvas];

    pub fn from_code(code: f64) -> Option<Self> {
        Self::ALL.into_iter().find(|k| f64::from(k.code()) == code)
    }
}

/// Second element of a `DomEvent` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DomEventKind {
    PointerMove = 0,
    PointerDown = 1,
    PointerUp = 2,
    KeyDown = 3,
    KeyUp = 4,
    Wheel = 5,
    Resize = 6,
    Zoom = 7,
}

impl DomEventKind {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub const ALL: [Self; 8] = [
        Self::PointerMove,
        Self::PointerDown,
        Self::PointerUp,
        Self::KeyDown,
        Self::KeyUp,
        Self::Wheel,
        Self::Resize,
        Self::Zoom,
    ];

    pub fn from_code(code: f64) -> Option<Self> {
        Self::ALL.into_iter().find(|k| f64::from(k.code()) == code)
    }

    /// DOM event type the kind is captured from.
    pub fn dom_name(self) -> &'static str {
        match self {
            Self::PointerMove => "pointermove",
            Self::PointerDown => "pointerdown",
            Self::PointerUp => "pointerup",
            Self::KeyDown => "keydown",
            Self::KeyUp => "keyup",
            Self::Wheel | Self::Zoom => "wheel",
            Self::Resize => "resize",
        }
    }

    fn payload_len(self) -> usize {
        match self {
            Self::PointerMove | Self::PointerDown | Self::PointerUp => 2,
            Self::KeyDown | Self::KeyUp => 1,
            Self::Wheel => 0,
            Self::Resize => 3,
            Self::Zoom => 2,
        }
    }
}

/// One array element. `H` is the host's opaque transferable handle.
#[derive(Debug, Clone, PartialEq)]
pub enum Field<H> {
    Number(f64),
    Text(String),
    Handle(H),
}

impl<H> Field<H> {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn into_handle(self) -> Option<H> {
        match self {
            Self::Handle(h) => Some(h),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DomEvent {
    PointerMove { x: f64, y: f64 },
    PointerDown { x: f64, y: f64 },
    PointerUp { x: f64, y: f64 },
    KeyDown { key: String },
    KeyUp { key: String },
    Wheel,
    Resize { width: f64, height: f64, scale_factor: f64 },
    /// Wheel scroll with its vertical delta; `delta_mode` is the DOM
    /// `deltaMode` (0 pixels, 1 lines, 2 pages).
    Zoom { delta_y: f64, delta_mode: f64 },
}

impl DomEvent {
    pub fn kind(&self) -> DomEventKind {
        match self {
            Self::PointerMove { .. } => DomEventKind::PointerMove,
            Self::PointerDown { .. } => DomEventKind::PointerDown,
            Self::PointerUp { .. } => DomEventKind::PointerUp,
            Self::KeyDown { .. } => DomEventKind::KeyDown,
            Self::KeyUp { .. } => DomEventKind::KeyUp,
            Self::Wheel => DomEventKind::Wheel,
            Self::Resize { .. } => DomEventKind::Resize,
            Self::Zoom { .. } => DomEventKind::Zoom,
        }
    }
}

/// A decoded protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message<H> {
    Dom(DomEvent),
    Custom(CustomCommand),
    /// Carries the transferred drawing surface.
    AttachCanvas(H),
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("empty message")]
    Empty,
    #[error("message kind is not a known number")]
    UnknownKind,
    #[error("DOM event kind is not a known number")]
    UnknownDomEvent,
    #[error("`{kind}` expects {expected} fields, got {actual}")]
    Arity {
        kind: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("field {index} of `{kind}` has the wrong type")]
    FieldType { kind: &'static str, index: usize },
    #[error("invalid custom command: {0}")]
    Command(#[from] serde_json::Error),
}

impl<H> Message<H> {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Dom(_) => MessageKind::DomEvent,
            Self::Custom(_) => MessageKind::Custom,
            Self::AttachCanvas(_) => MessageKind::AttachCanvas,
        }
    }

    /// Flatten into the wire array. Handles are moved into the array so
    /// the host can transfer them.
    pub fn encode(self) -> Vec<Field<H>> {
        let kind = Field::Number(self.kind().code().into());
        match self {
            Self::Dom(event) => {
                let mut fields = vec![kind, Field::Number(event.kind().code().into())];
                match event {
                    DomEvent::PointerMove { x, y }
                    | DomEvent::PointerDown { x, y }
                    | DomEvent::PointerUp { x, y } => {
                        fields.extend([Field::Number(x), Field::Number(y)]);
                    }
                    DomEvent::KeyDown { key } | DomEvent::KeyUp { key } => {
                        fields.push(Field::Text(key));
                    }
                    DomEvent::Wheel => {}
                    DomEvent::Resize {
                        width,
                        height,
                        scale_factor,
                    } => {
                        fields.extend([
                            Field::Number(width),
                            Field::Number(height),
                            Field::Number(scale_factor),
                        ]);
                    }
                    DomEvent::Zoom {
                        delta_y,
                        delta_mode,
                    } => {
                        fields.extend([Field::Number(delta_y), Field::Number(delta_mode)]);
                    }
                }
                fields
            }
            Self::Custom(command) => vec![kind, Field::Text(command.to_json())],
            Self::AttachCanvas(handle) => vec![kind, Field::Handle(handle)],
        }
    }

    /// Decode a wire array, ignoring anything malformed or unknown.
    pub fn decode(fields: Vec<Field<H>>) -> Option<Self> {
        match Self::try_decode(fields) {
            Ok(message) => Some(message),
            Err(err) => {
                debug!(error = %err, "message ignored");
                None
            }
        }
    }

    pub fn try_decode(fields: Vec<Field<H>>) -> Result<Self, DecodeError> {
        let mut fields = fields.into_iter();
        let kind = fields
            .next()
            .ok_or(DecodeError::Empty)?
            .as_number()
            .and_then(MessageKind::from_code)
            .ok_or(DecodeError::UnknownKind)?;
        let rest: Vec<Field<H>> = fields.collect();

        match kind {
            MessageKind::DomEvent => decode_dom(rest).map(Self::Dom),
            MessageKind::Custom => {
                let [text] = exact::<H, 1>(rest, "custom")?;
                let json = text.as_text().ok_or(DecodeError::FieldType {
                    kind: "custom",
                    index: 1,
                })?;
                Ok(Self::Custom(CustomCommand::from_json(json)?))
            }
            MessageKind::AttachCanvas => {
                let [handle] = exact::<H, 1>(rest, "attachCanvas")?;
                handle
                    .into_handle()
                    .map(Self::AttachCanvas)
                    .ok_or(DecodeError::FieldType {
                        kind: "attachCanvas",
                        index: 1,
                    })
            }
        }
    }
}

fn decode_dom<H>(fields: Vec<Field<H>>) -> Result<DomEvent, DecodeError> {
    let mut fields = fields.into_iter();
    let kind = fields
        .next()
        .and_then(|f| f.as_number())
        .and_then(DomEventKind::from_code)
        .ok_or(DecodeError::UnknownDomEvent)?;
    let payload: Vec<Field<H>> = fields.collect();
    let name = kind.dom_name();
    if payload.len() != kind.payload_len() {
        return Err(DecodeError::Arity {
            kind: name,
            expected: kind.payload_len() + 2,
            actual: payload.len() + 2,
        });
    }
    // Payload starts at index 2 of the full message.
    let number = |index: usize| {
        payload[index].as_number().ok_or(DecodeError::FieldType {
            kind: name,
            index: index + 2,
        })
    };
    let text = |index: usize| {
        payload[index]
            .as_text()
            .map(str::to_string)
            .ok_or(DecodeError::FieldType {
                kind: name,
                index: index + 2,
            })
    };

    Ok(match kind {
        DomEventKind::PointerMove => DomEvent::PointerMove {
            x: number(0)?,
            y: number(1)?,
        },
        DomEventKind::PointerDown => DomEvent::PointerDown {
            x: number(0)?,
            y: number(1)?,
        },
        DomEventKind::PointerUp => DomEvent::PointerUp {
            x: number(0)?,
            y: number(1)?,
        },
        DomEventKind::KeyDown => DomEvent::KeyDown { key: text(0)? },
        DomEventKind::KeyUp => DomEvent::KeyUp { key: text(0)? },
        DomEventKind::Wheel => DomEvent::Wheel,
        DomEventKind::Resize => DomEvent::Resize {
            width: number(0)?,
            height: number(1)?,
            scale_factor: number(2)?,
        },
        DomEventKind::Zoom => DomEvent::Zoom {
            delta_y: number(0)?,
            delta_mode: number(1)?,
        },
    })
}

fn exact<H, const N: usize>(
    fields: Vec<Field<H>>,
    kind: &'static str,
) -> Result<[Field<H>; N], DecodeError> {
    let actual = fields.len();
    fields.try_into().map_err(|_| DecodeError::Arity {
        kind,
        expected: N + 1,
        actual: actual + 1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Stand-in for a transferable host object.
    #[derive(Debug, Clone, PartialEq)]
    struct Canvas(u32);

    fn n(v: f64) -> Field<Canvas> {
        Field::Number(v)
    }

    #[test]
    fn pointer_move_round_trip() {
        let fields = vec![n(0.0), n(0.0), n(12.0), n(34.0)];
        let message = Message::decode(fields.clone()).unwrap();
        assert_eq!(message, Message::Dom(DomEvent::PointerMove { x: 12.0, y: 34.0 }));
        assert_eq!(message.encode(), fields);
    }

    #[test]
    fn key_events_carry_the_key() {
        let fields = vec![n(0.0), n(3.0), Field::Text("ArrowLeft".into())];
        assert_eq!(
            Message::<Canvas>::decode(fields),
            Some(Message::Dom(DomEvent::KeyDown {
                key: "ArrowLeft".into()
            }))
        );
        let up = Message::<Canvas>::Dom(DomEvent::KeyUp { key: "a".into() }).encode();
        assert_eq!(up, vec![n(0.0), n(4.0), Field::Text("a".into())]);
    }

    #[test]
    fn wheel_has_empty_payload() {
        assert_eq!(Message::<Canvas>::Dom(DomEvent::Wheel).encode(), vec![n(0.0), n(5.0)]);
        assert_eq!(
            Message::<Canvas>::decode(vec![n(0.0), n(5.0)]),
            Some(Message::Dom(DomEvent::Wheel))
        );
    }

    #[test]
    fn resize_carries_size_and_scale() {
        let fields = vec![n(0.0), n(6.0), n(1280.0), n(720.0), n(2.0)];
        assert_eq!(
            Message::<Canvas>::decode(fields),
            Some(Message::Dom(DomEvent::Resize {
                width: 1280.0,
                height: 720.0,
                scale_factor: 2.0
            }))
        );
    }

    #[test]
    fn zoom_carries_delta_and_mode() {
        let fields = vec![n(0.0), n(7.0), n(-120.0), n(0.0)];
        let message = Message::<Canvas>::decode(fields.clone()).unwrap();
        assert_eq!(
            message,
            Message::Dom(DomEvent::Zoom {
                delta_y: -120.0,
                delta_mode: 0.0
            })
        );
        assert_eq!(message.encode(), fields);
        assert_eq!(Message::<Canvas>::decode(vec![n(0.0), n(7.0), n(-120.0)]), None);
    }

    #[test]
    fn attach_canvas_moves_the_handle() {
        let fields = Message::AttachCanvas(Canvas(7)).encode();
        assert_eq!(fields, vec![n(2.0), Field::Handle(Canvas(7))]);
        assert_eq!(Message::decode(fields), Some(Message::AttachCanvas(Canvas(7))));
    }

    #[test]
    fn custom_command_round_trip() {
        let message = Message::<Canvas>::Custom(CustomCommand::LoadMesh {
            url: "models/duck.glb".into(),
        });
        let fields = message.clone().encode();
        assert_eq!(fields[0], n(1.0));
        assert_eq!(Message::decode(fields), Some(message));
    }

    #[test]
    fn unknown_and_empty_messages_are_ignored() {
        assert_eq!(Message::<Canvas>::decode(vec![]), None);
        assert_eq!(Message::<Canvas>::decode(vec![n(9.0)]), None);
        assert_eq!(Message::<Canvas>::decode(vec![n(0.5), n(0.0)]), None);
        assert_eq!(Message::<Canvas>::decode(vec![Field::Text("0".into())]), None);
        assert_eq!(Message::<Canvas>::decode(vec![n(0.0), n(42.0), n(1.0), n(1.0)]), None);
        assert_eq!(
            Message::<Canvas>::decode(vec![n(1.0), Field::Text(r#"{"command":"explode"}"#.into())]),
            None
        );
    }

    #[test]
    fn malformed_shapes_are_rejected() {
        let err = Message::<Canvas>::try_decode(vec![n(0.0), n(0.0), n(1.0)]).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Arity {
                kind: "pointermove",
                expected: 4,
                actual: 3
            }
        ));
        let err =
            Message::<Canvas>::try_decode(vec![n(0.0), n(3.0), n(65.0)]).unwrap_err();
        assert!(matches!(err, DecodeError::FieldType { kind: "keydown", index: 2 }));
        let err = Message::<Canvas>::try_decode(vec![n(2.0), n(1.0)]).unwrap_err();
        assert!(matches!(err, DecodeError::FieldType { kind: "attachCanvas", index: 1 }));
        let err = Message::<Canvas>::try_decode(vec![n(2.0)]).unwrap_err();
        assert!(matches!(err, DecodeError::Arity { .. }));
    }

    #[test]
    fn kind_codes_are_stable() {
        assert_eq!(MessageKind::DomEvent.code(), 0);
        assert_eq!(MessageKind::Custom.code(), 1);
        assert_eq!(MessageKind::AttachCanvas.code(), 2);
        for code in 0..=7u8 {
            let kind = DomEventKind::from_code(code.into()).unwrap();
            assert_eq!(kind.code(), code);
        }
        assert_eq!(DomEventKind::from_code(8.0), None);
    }
}
