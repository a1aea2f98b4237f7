#[cfg(test)]
mod tests {
    use crate::codec::filter::{CanFilter, any_match, validate_filters};
    use crate::codec::frame::{CAN_EFF_FLAG, CAN_MTU, CAN_RTR_FLAG, Frame, Timestamp};
    use crate::codec::signal::{SignalError, decode_signal, encode_signal};
    use crate::error::Error;

    #[test]
    fn test_frame_serialization() {
        let frame = Frame::new(0x123, &[0x01, 0x02]).unwrap();
        let bytes = frame.to_bytes();

        assert_eq!(bytes.len(), CAN_MTU);
        assert_eq!(&bytes[0..4], &0x123u32.to_ne_bytes());
        assert_eq!(bytes[4], 2);
        assert_eq!(&bytes[8..10], &[0x01, 0x02]);
        assert!(bytes[10..].iter().all(|b| *b == 0));

        let decoded = Frame::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_extended_frame_flags() {
        let frame = Frame::new_extended(0x1ABC_DEF0, &[0xAA]).unwrap();
        assert_eq!(frame.raw_id(), 0x1ABC_DEF0 | CAN_EFF_FLAG);

        let decoded = Frame::from_bytes(&frame.to_bytes()).unwrap();
        assert!(decoded.is_extended());
        assert_eq!(decoded.id(), 0x1ABC_DEF0);
    }

    #[test]
    fn test_remote_frame_has_no_payload() {
        let frame = Frame::remote(0x7FF, false, 4).unwrap();
        assert!(frame.is_rtr());
        assert_eq!(frame.dlc(), 4);
        assert!(frame.data().is_empty());
        assert_eq!(frame.raw_id() & CAN_RTR_FLAG, CAN_RTR_FLAG);

        let bytes = frame.to_bytes();
        assert_eq!(bytes[4], 4);
        assert!(bytes[8..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_frame_limits() {
        assert!(matches!(Frame::new(0x800, &[]), Err(Error::InvalidFrame(_))));
        assert!(matches!(Frame::new_extended(0x2000_0000, &[]), Err(Error::InvalidFrame(_))));
        assert!(matches!(Frame::new(0x10, &[0; 9]), Err(Error::InvalidFrame(_))));
        assert!(Frame::new(0x7FF, &[0; 8]).is_ok());
    }

    #[test]
    fn test_short_buffer_rejected() {
        assert!(Frame::from_bytes(&[0u8; 8]).is_err());

        let mut bytes = Frame::new(0x1, &[]).unwrap().to_bytes();
        bytes[4] = 9;
        assert!(Frame::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_timestamp_is_kept() {
        let ts = Timestamp::new(1_700_000_000, 250);
        let frame = Frame::new(0x10, &[1]).unwrap().with_timestamp(ts);
        assert_eq!(frame.timestamp(), Some(ts));
        // The wire layout carries no timestamp.
        assert_eq!(Frame::from_bytes(&frame.to_bytes()).unwrap().timestamp(), None);
    }

    #[test]
    fn test_cansend_notation() {
        let frame: Frame = "123#0102".parse().unwrap();
        assert_eq!(frame, Frame::new(0x123, &[1, 2]).unwrap());
        assert_eq!(frame.to_string(), "123#0102");

        let frame: Frame = "1F334455#11.22".parse().unwrap();
        assert!(frame.is_extended());
        assert_eq!(frame.data(), &[0x11, 0x22]);
        assert_eq!(frame.to_string(), "1F334455#1122");

        let frame: Frame = "0AB#R3".parse().unwrap();
        assert!(frame.is_rtr());
        assert_eq!(frame.dlc(), 3);
        assert_eq!(frame.to_string(), "0AB#R3");

        assert!("12#00".parse::<Frame>().is_err());
        assert!("123#0".parse::<Frame>().is_err());
        assert!("123".parse::<Frame>().is_err());
    }

    #[test]
    fn test_cansend_notation_rejects_non_hex() {
        for text in ["123#aé0", "123#é", "123#0g", "12+#00", "+1234567#00", "123#.é"] {
            match text.parse::<Frame>() {
                Err(Error::InvalidFrame(_)) => {}
                other => panic!("'{}' gave {:?}", text, other),
            }
        }
    }

    #[test]
    fn test_error_frame_notation() {
        let frame = Frame::error(0x4, &[0, 8, 0, 0, 0, 0, 0, 0]).unwrap();
        let text = frame.to_string();
        assert_eq!(text, "20000004#0008000000000000");

        let parsed: Frame = text.parse().unwrap();
        assert_eq!(parsed, frame);
        assert!(parsed.is_error_frame());
        assert!(!parsed.is_extended());
        assert_eq!(parsed.id(), 0x4);

        assert!("20000004#R".parse::<Frame>().is_err());
    }

    #[test]
    fn test_filter_matching() {
        let std_frame = Frame::new(0x123, &[]).unwrap();
        let ext_frame = Frame::new_extended(0x123, &[]).unwrap();

        let exact = CanFilter::exact(0x123, false);
        assert!(exact.matches(&std_frame));
        assert!(!exact.matches(&ext_frame));

        let range = CanFilter::new(0x100, 0x700);
        assert!(range.matches(&std_frame));
        assert!(!range.matches(&Frame::new(0x223, &[]).unwrap()));

        let inverted = exact.inverted();
        assert!(inverted.is_inverted());
        assert!(!inverted.matches(&std_frame));
        assert!(inverted.matches(&Frame::new(0x124, &[]).unwrap()));

        assert!(CanFilter::accept_all().matches(&ext_frame));
    }

    #[test]
    fn test_empty_filter_list_passes_nothing() {
        let frame = Frame::new(0x1, &[]).unwrap();
        assert!(!any_match(&[], &frame));
        assert!(any_match(&[CanFilter::new(0x2, 0x7FF), CanFilter::accept_all()], &frame));
    }

    #[test]
    fn test_filter_limit() {
        assert!(validate_filters(&vec![CanFilter::accept_all(); 512]).is_ok());
        assert!(matches!(
            validate_filters(&vec![CanFilter::accept_all(); 513]),
            Err(Error::InvalidFilter(_))
        ));
    }

    #[test]
    fn test_filter_layout() {
        assert_eq!(std::mem::size_of::<CanFilter>(), std::mem::size_of::<libc::can_filter>());
        assert_eq!(std::mem::align_of::<CanFilter>(), std::mem::align_of::<libc::can_filter>());
    }

    #[test]
    fn test_byte_aligned_signals() {
        let data = [0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC, 0xDE, 0xF0];

        assert_eq!(decode_signal(&data, 8, 8, true, false).unwrap(), 0x34);
        assert_eq!(decode_signal(&data, 8, 16, true, false).unwrap(), 0x5634);
        assert_eq!(decode_signal(&data, 8, 16, false, false).unwrap(), 0x3456);
        assert_eq!(decode_signal(&data, 0, 32, false, false).unwrap(), 0x1234_5678);
        assert_eq!(decode_signal(&data, 0, 32, true, false).unwrap(), 0x7856_3412);
    }

    #[test]
    fn test_signed_signals() {
        let data = [0xCE, 0x18, 0xFC];
        assert_eq!(decode_signal(&data, 0, 8, true, true).unwrap(), -50);
        assert_eq!(decode_signal(&data, 8, 16, true, true).unwrap(), -1000);
        assert_eq!(decode_signal(&data, 0, 4, true, true).unwrap(), -2);
        assert_eq!(decode_signal(&data, 0, 4, true, false).unwrap(), 0xE);
    }

    #[test]
    fn test_unaligned_little_endian() {
        let mut data = [0u8; 2];
        encode_signal(&mut data, 4, 8, true, 0xAB).unwrap();
        assert_eq!(data, [0xB0, 0x0A]);
        assert_eq!(decode_signal(&data, 4, 8, true, false).unwrap(), 0xAB);
    }

    #[test]
    fn test_encode_preserves_neighbours() {
        let mut data = [0xFF; 2];
        encode_signal(&mut data, 3, 2, true, 0).unwrap();
        assert_eq!(data, [0xE7, 0xFF]);

        let mut data = [0u8; 2];
        encode_signal(&mut data, 4, 8, false, 0xAB).unwrap();
        assert_eq!(data, [0x0A, 0xB0]);
    }

    #[test]
    fn test_encode_truncates() {
        let mut data = [0u8; 1];
        encode_signal(&mut data, 0, 4, true, -1).unwrap();
        assert_eq!(data, [0x0F]);
    }

    #[test]
    fn test_signal_bounds() {
        let data = [0u8; 2];
        assert_eq!(decode_signal(&data, 0, 0, true, false), Err(SignalError::InvalidLength(0)));
        assert!(matches!(
            decode_signal(&data, 10, 8, true, false),
            Err(SignalError::OutOfRange { payload_bits: 16, .. })
        ));
        assert!(decode_signal(&[0u8; 8], 0, 64, true, true).is_ok());
    }
}
