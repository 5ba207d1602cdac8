//! Unit tests for the Identifiers module

use core_kernel::{CustomerId, InvoiceId, NotificationId, PlanId, SubscriptionId};
use std::collections::HashSet;
use uuid::Uuid;

mod invoice_id_tests {
    use super::*;

    #[test]
    fn test_new_generates_unique_ids() {
        let id1 = InvoiceId::new();
        let id2 = InvoiceId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_new_v7_generates_time_ordered_ids() {
        let id1 = InvoiceId::new_v7();
        std::thread::sleep(std::time::Duration::from_millis(1));
        let id2 = InvoiceId::new_v7();
        let uuid1: Uuid = id1.into();
        let uuid2: Uuid = id2.into();
        assert!(uuid1 < uuid2);
    }

    #[test]
    fn test_from_str_with_prefix() {
        let original = InvoiceId::new();
        let parsed: InvoiceId = original.to_string().parse().unwrap();
        assert_eq!(original, parsed);
    }

    #[test]
    fn test_from_str_rejects_garbage() {
        assert!("INV-not-a-uuid".parse::<InvoiceId>().is_err());
    }
}

mod prefix_tests {
    use super::*;

    #[test]
    fn test_prefixes_are_distinct() {
        let prefixes: HashSet<&str> = [
            CustomerId::prefix(),
            PlanId::prefix(),
            SubscriptionId::prefix(),
            InvoiceId::prefix(),
            NotificationId::prefix(),
        ]
        .into_iter()
        .collect();
        assert_eq!(prefixes.len(), 5);
    }

    #[test]
    fn test_display_format() {
        assert!(SubscriptionId::new().to_string().starts_with("SUB-"));
        assert!(CustomerId::new().to_string().starts_with("CUS-"));
        assert!(NotificationId::new().to_string().starts_with("NTF-"));
    }
}

mod serialization_tests {
    use super::*;

    #[test]
    fn test_ids_serialize_as_plain_uuid() {
        let uuid = Uuid::new_v4();
        let id = PlanId::from_uuid(uuid);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", uuid));
    }
}
