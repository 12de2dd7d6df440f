#[cfg(test)]
mod tests {
    use crate::conventions::*;
    use crate::password::{generate_password, meets_complexity};
    use crate::types::*;

    fn idx(n: u32) -> StudentIndex {
        StudentIndex::new(n).unwrap()
    }

    #[test]
    fn student_index_bounds() {
        assert!(StudentIndex::new(0).is_err());
        assert!(StudentIndex::new(1).is_ok());
        assert!(StudentIndex::new(MAX_STUDENTS).is_ok());
        assert!(StudentIndex::new(MAX_STUDENTS + 1).is_err());
    }

    #[test]
    fn first_n_is_ascending_and_bounded() {
        let indexes = StudentIndex::first_n(3).unwrap();
        assert_eq!(indexes, vec![idx(1), idx(2), idx(3)]);
        assert!(StudentIndex::first_n(0).is_err());
        assert!(StudentIndex::first_n(MAX_STUDENTS + 1).is_err());
    }

    #[test]
    fn names_are_deterministic() {
        let names = PodNames::new(idx(7), "lab.example.com");
        assert_eq!(names.admin_upn(), "admin7@lab.example.com");
        assert_eq!(names.student_upn(), "W365Student7@lab.example.com");
        assert_eq!(names.group_name(GroupRole::Admins), "SG-Student7-Admins");
        assert_eq!(names.group_name(GroupRole::Users), "SG-Student7-Users");
        assert_eq!(names.group_name(GroupRole::Devices), "SG-Student7-Devices");
        assert_eq!(names.scope_tag_name(), "ST7");
        assert_eq!(names.admin_unit_name(), "AU-Student7");
        assert_eq!(names.role_assignment_name(), "RA-Student7");

        let again = PodNames::new(idx(7), "lab.example.com");
        assert_eq!(names, again);
    }

    #[test]
    fn names_never_collide_across_students() {
        let a = PodNames::new(idx(1), "lab.example.com");
        let b = PodNames::new(idx(2), "lab.example.com");
        assert_ne!(a.admin_upn(), b.admin_upn());
        assert_ne!(a.student_upn(), b.student_upn());
        for role in GroupRole::all() {
            assert_ne!(a.group_name(*role), b.group_name(*role));
        }
        assert_ne!(a.scope_tag_name(), b.scope_tag_name());
        assert_ne!(a.admin_unit_name(), b.admin_unit_name());
    }

    #[test]
    fn generated_password_meets_complexity() {
        let p = generate_password(16);
        assert_eq!(p.chars().count(), 16);
        assert!(meets_complexity(&p), "not complex enough: {p}");
    }

    #[test]
    fn short_request_is_raised_to_floor() {
        let p = generate_password(4);
        assert_eq!(p.chars().count(), 8);
        assert!(meets_complexity(&p));
    }

    #[test]
    fn passwords_are_not_constant() {
        assert_ne!(generate_password(16), generate_password(16));
    }

    #[test]
    fn allowed_actions_are_enumerated_not_wildcarded() {
        assert!(!LAB_INTUNE_ALLOWED_ACTIONS.is_empty());
        assert!(LAB_INTUNE_ALLOWED_ACTIONS.iter().all(|a| !a.contains('*')));
        assert!(LAB_INTUNE_ALLOWED_ACTIONS.contains(&"Microsoft.Intune_ManagedDevices_Retire"));
        assert!(LAB_INTUNE_ALLOWED_ACTIONS.contains(&"Microsoft.Intune_RemoteTasks_RebootNow"));
    }

    #[test]
    fn new_user_debug_redacts_password() {
        let req = NewUser {
            user_principal_name: "admin1@lab.example.com".into(),
            display_name: "Student 1 Admin".into(),
            mail_nickname: "admin1".into(),
            password: "Sup3r-Secret!".into(),
            force_password_change: true,
        };
        let rendered = format!("{req:?}");
        assert!(!rendered.contains("Sup3r-Secret!"));
        assert!(rendered.contains("<redacted>"));
    }
}
