//! Tests for message types and domain identifiers.

use super::*;

mod queue_key {
    use super::*;

    #[test]
    fn test_parse_decimal_and_hex_keys() {
        assert_eq!("31337".parse::<QueueKey>().unwrap().value(), 31337);
        assert_eq!("0x7a69".parse::<QueueKey>().unwrap().value(), 31337);
        assert_eq!("-5".parse::<QueueKey>().unwrap().value(), -5);
    }

    #[test]
    fn test_non_integer_key_is_rejected() {
        let result = "/tmp/some/path".parse::<QueueKey>();
        assert!(matches!(
            result,
            Err(ValidationError::InvalidFormat { ref field, .. }) if field == "key"
        ));

        assert!(matches!(
            "".parse::<QueueKey>(),
            Err(ValidationError::Required { .. })
        ));
        assert!("12.5".parse::<QueueKey>().is_err());
    }

    #[test]
    fn test_sign_after_prefix_is_rejected() {
        for text in ["0x-5", "0x+5", "--5", "-+5", "0o-7"] {
            let result = text.parse::<QueueKey>();
            assert!(
                matches!(result, Err(ValidationError::InvalidFormat { .. })),
                "{text} should be rejected"
            );
        }
        assert!("0x-666".parse::<Permissions>().is_err());
    }

    #[test]
    fn test_key_outside_key_t_range_is_rejected() {
        let result = QueueKey::try_from(1_i64 << 40);
        assert!(matches!(result, Err(ValidationError::OutOfRange { .. })));

        assert_eq!(QueueKey::try_from(42_i64).unwrap(), QueueKey::new(42));
    }
}

mod permissions {
    use super::*;

    #[test]
    fn test_default_permissions_map_to_octal_0666() {
        let permissions = Permissions::default();
        assert_eq!(permissions.bits(), 0x666);
        assert_eq!(permissions.mode(), 0o666);
    }

    #[test]
    fn test_creation_flags_include_create_bit() {
        let flags = Permissions::new(0x640).creation_flags();
        assert!(flags.creates());
        assert_eq!(flags.bits(), IPC_CREAT | 0o640);
        assert_eq!(flags.mode(), 0o640);
        assert_eq!(IPC_CREAT, 512);
    }

    #[test]
    fn test_execute_bits_are_kept() {
        assert_eq!(Permissions::new(0x777).mode(), 0o777);
        assert_eq!(Permissions::new(0x751).mode(), 0o751);
    }

    #[test]
    fn test_each_class_is_reencoded_independently() {
        assert_eq!(Permissions::new(0x600).mode(), 0o600);
        assert_eq!(Permissions::new(0x060).mode(), 0o060);
        assert_eq!(Permissions::new(0x006).mode(), 0o006);
        assert_eq!(Permissions::new(0x777).mode(), 0o777);
    }

    #[test]
    fn test_parse_permissions() {
        assert_eq!("0x644".parse::<Permissions>().unwrap().bits(), 0x644);
        assert!("rw-r--r--".parse::<Permissions>().is_err());
        assert!("-1".parse::<Permissions>().is_err());
    }
}

mod message_type {
    use super::*;

    #[test]
    fn test_zero_and_negative_types_are_rejected() {
        assert!(MessageType::new(0).is_err());
        assert!(MessageType::new(-3).is_err());
        assert_eq!(MessageType::new(3).unwrap().value(), 3);
    }

    #[test]
    fn test_send_options_default_to_type_one() {
        let options = SendOptions::new();
        assert_eq!(options.resolved_type().unwrap().value(), DEFAULT_SEND_TYPE);
        assert_eq!(options.flags, 0);

        let options = SendOptions::new().with_type(0);
        assert!(options.resolved_type().is_err());
    }

    #[test]
    fn test_receive_options_default_to_any_type() {
        let options = ReceiveOptions::new();
        assert!(options.selector.is_any());
        assert_eq!(options.flags, 0);

        let options = ReceiveOptions::new().with_type(-4).with_flags(IPC_NOWAIT);
        assert_eq!(options.selector.value(), -4);
        assert_eq!(options.flags, IPC_NOWAIT);
    }
}

mod type_selector {
    use super::*;

    const ARRIVALS: [i64; 5] = [5, 3, 2, 3, 2];

    #[test]
    fn test_any_selects_oldest() {
        assert_eq!(TypeSelector::ANY.select(ARRIVALS, false), Some(0));
        assert_eq!(TypeSelector::ANY.select(Vec::<i64>::new(), false), None);
    }

    #[test]
    fn test_positive_selects_oldest_of_exact_type() {
        assert_eq!(TypeSelector::new(3).select(ARRIVALS, false), Some(1));
        assert_eq!(TypeSelector::new(2).select(ARRIVALS, false), Some(2));
        assert_eq!(TypeSelector::new(9).select(ARRIVALS, false), None);
    }

    #[test]
    fn test_negative_selects_lowest_type_within_bound() {
        assert_eq!(TypeSelector::new(-3).select(ARRIVALS, false), Some(2));
        assert_eq!(TypeSelector::new(-10).select(ARRIVALS, false), Some(2));
        assert_eq!(TypeSelector::new(-1).select(ARRIVALS, false), None);
    }

    #[test]
    fn test_except_selects_first_other_type() {
        assert_eq!(TypeSelector::new(5).select(ARRIVALS, true), Some(1));
        assert_eq!(TypeSelector::new(3).select(ARRIVALS, true), Some(0));
    }
}
