//! Builds the caller-scoped [`Ability`] for one request.

use tracing::debug;

use crate::ability::AbilityBuilder;
use crate::{Ability, Action, AuthUser, Condition, Field, Role, SubjectType};

/// Stateless ability factory.
///
/// - No IO
/// - No caching: an ability is rebuilt for every request
/// - Cost is proportional to the caller's role count
#[derive(Debug, Default, Copy, Clone)]
pub struct AbilityFactory;

impl AbilityFactory {
    pub fn new() -> Self {
        Self
    }

    pub fn create_for_user(&self, user: Option<&AuthUser>) -> Ability {
        let mut builder = Ability::builder();

        let Some(user) = user else {
            allow_unarchived_courses(&mut builder);
            return builder.build();
        };

        if user.has_role(&Role::SYSTEM_ADMIN) {
            builder.can(Action::Manage, SubjectType::All);
            return builder.build();
        }

        if user.has_role(&Role::ORGANIZATION_ADMIN) {
            match user.organization_id {
                Some(organization_id) => {
                    let in_org = Condition::eq(Field::OrganizationId, organization_id);
                    builder
                        .can_where(Action::Manage, SubjectType::Course, in_org.clone())
                        .can_where(
                            Action::Manage,
                            SubjectType::Lesson,
                            Condition::eq(Field::CourseOrganizationId, organization_id),
                        )
                        .can_where(Action::Manage, SubjectType::HttpRequestLog, in_org.clone())
                        .can_where(Action::Read, SubjectType::User, in_org.clone())
                        .can_where(Action::Manage, SubjectType::User, in_org.clone())
                        .can_where(Action::Create, SubjectType::User, in_org.clone())
                        .can_where(Action::Update, SubjectType::User, in_org);
                }
                None => {
                    debug!(user_id = %user.id, "organization-admin without organization; no organization rules granted");
                }
            }
        }

        if user.has_role(&Role::TEACHER) {
            let own = Condition::eq(Field::InstructorId, user.id);
            builder
                .can_where(Action::Update, SubjectType::Course, own.clone())
                .can_where(Action::Delete, SubjectType::Course, own.clone())
                .can_where(Action::Manage, SubjectType::Lesson, own);

            if !user.subject_scopes.is_empty() {
                allow_scoped_courses(&mut builder, &user.subject_scopes);
            }
        }

        if user.subject_scopes.is_empty() {
            allow_unarchived_courses(&mut builder);
        } else {
            allow_scoped_courses(&mut builder, &user.subject_scopes);
        }

        builder.build()
    }
}

fn allow_unarchived_courses(builder: &mut AbilityBuilder) {
    builder.can_where(
        Action::Read,
        SubjectType::Course,
        Condition::eq(Field::IsArchived, false),
    );
}

fn allow_scoped_courses(builder: &mut AbilityBuilder, scopes: &[String]) {
    builder.can_where(
        Action::Read,
        SubjectType::Course,
        Condition::and([
            Condition::one_of(Field::Subject, scopes.iter().cloned()),
            Condition::eq(Field::IsArchived, false),
        ]),
    );
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use campus_core::{CourseId, LessonId, LogId, OrganizationId, UserId};

    use super::*;
    use crate::{AccessFilter, AttributeBag, CourseRecord, LessonRecord, Rule, UserRecord};

    fn course(org: Option<OrganizationId>, instructor: Option<UserId>, subject: &str, archived: bool) -> CourseRecord {
        CourseRecord {
            id: CourseId::new(),
            organization_id: org,
            instructor_id: instructor,
            subject: subject.to_string(),
            title: "Course".to_string(),
            is_archived: archived,
        }
    }

    fn user(roles: Vec<Role>) -> AuthUser {
        AuthUser::new(UserId::new()).with_roles(roles)
    }

    #[test]
    fn anonymous_reads_only_unarchived_courses() {
        let ability = AbilityFactory::new().create_for_user(None);
        assert!(ability.can_on(Action::Read, &course(None, None, "math", false)));
        assert!(!ability.can_on(Action::Read, &course(None, None, "math", true)));
        assert!(!ability.can(Action::Update, SubjectType::Course));
        assert!(!ability.can(Action::Read, SubjectType::HttpRequestLog));
    }

    #[test]
    fn caller_without_roles_or_scopes_gets_exactly_one_rule() {
        let ability = AbilityFactory::new().create_for_user(Some(&user(vec![])));
        assert_eq!(
            ability.rules(),
            &[Rule {
                action: Action::Read,
                subject: SubjectType::Course,
                conditions: Some(Condition::eq(Field::IsArchived, false)),
            }]
        );
        assert!(!ability.can_on(Action::Read, &course(None, None, "math", true)));
    }

    #[test]
    fn system_admin_short_circuits() {
        let admin = user(vec![Role::TEACHER, Role::SYSTEM_ADMIN]).with_subject_scopes(["math"]);
        let ability = AbilityFactory::new().create_for_user(Some(&admin));
        assert_eq!(ability.rules().len(), 1);
        assert!(ability.is_system_admin());
        assert!(ability.can(Action::Manage, SubjectType::All));
        assert_eq!(
            ability.accessible_filter(Action::Manage, SubjectType::HttpRequestLog),
            AccessFilter::All
        );
    }

    #[test]
    fn organization_admin_is_confined_to_own_organization() {
        let org1 = OrganizationId::new();
        let org2 = OrganizationId::new();
        let admin = user(vec![Role::ORGANIZATION_ADMIN]).with_organization(org1);
        let ability = AbilityFactory::new().create_for_user(Some(&admin));

        assert!(ability.can_on(Action::Manage, &course(Some(org1), None, "math", false)));
        assert!(!ability.can_on(Action::Manage, &course(Some(org2), None, "math", false)));
        assert!(!ability.can(Action::Manage, SubjectType::All));
        assert!(!ability.is_system_admin());

        let lesson = LessonRecord {
            id: LessonId::new(),
            course_id: CourseId::new(),
            instructor_id: None,
            course_organization_id: Some(org1),
            title: "Fractions".to_string(),
        };
        assert!(ability.can_on(Action::Delete, &lesson));

        let member = UserRecord {
            id: UserId::new(),
            organization_id: Some(org2),
            display_name: "Outsider".to_string(),
        };
        assert!(!ability.can_on(Action::Read, &member));

        let log = AttributeBag::new(SubjectType::HttpRequestLog)
            .with(Field::Id, LogId::new())
            .with(Field::OrganizationId, org1);
        assert!(ability.can_on(Action::Manage, &log));
    }

    #[test]
    fn organization_admin_without_organization_gets_no_org_rules() {
        let admin = user(vec![Role::ORGANIZATION_ADMIN]);
        let ability = AbilityFactory::new().create_for_user(Some(&admin));
        assert!(!ability.can(Action::Manage, SubjectType::HttpRequestLog));
        assert!(ability.can(Action::Read, SubjectType::Course));
    }

    #[test]
    fn teacher_manages_own_courses_and_lessons() {
        let teacher = user(vec![Role::TEACHER]);
        let ability = AbilityFactory::new().create_for_user(Some(&teacher));

        let own = course(None, Some(teacher.id), "math", false);
        let other = course(None, Some(UserId::new()), "math", false);
        assert!(ability.can_on(Action::Update, &own));
        assert!(ability.can_on(Action::Delete, &own));
        assert!(!ability.can_on(Action::Update, &other));
        assert!(!ability.can_on(Action::Create, &own));

        let lesson = LessonRecord {
            id: LessonId::new(),
            course_id: own.id,
            instructor_id: Some(teacher.id),
            course_organization_id: None,
            title: "Intro".to_string(),
        };
        assert!(ability.can_on(Action::Manage, &lesson));
    }

    #[test]
    fn subject_scopes_restrict_course_reads() {
        let scoped = user(vec![]).with_subject_scopes(["math", "physics"]);
        let ability = AbilityFactory::new().create_for_user(Some(&scoped));

        assert!(ability.can_on(Action::Read, &course(None, None, "physics", false)));
        assert!(!ability.can_on(Action::Read, &course(None, None, "history", false)));
        assert!(!ability.can_on(Action::Read, &course(None, None, "math", true)));
    }

    #[test]
    fn scoped_teacher_reads_scoped_courses_only() {
        let teacher = user(vec![Role::TEACHER]).with_subject_scopes(["art"]);
        let ability = AbilityFactory::new().create_for_user(Some(&teacher));
        assert!(ability.can_on(Action::Read, &course(None, None, "art", false)));
        assert!(!ability.can_on(Action::Read, &course(None, None, "math", false)));
    }

    fn any_role() -> impl Strategy<Value = Role> {
        prop_oneof![
            Just(Role::TEACHER),
            Just(Role::ORGANIZATION_ADMIN),
            Just(Role::new("student")),
            "[a-z-]{1,12}".prop_map(|s: String| Role::new(s)),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: any role set that contains `system-admin` yields blanket `Manage` on `all`.
        #[test]
        fn system_admin_always_manages_all(
            mut roles in prop::collection::vec(any_role(), 0..6),
            position in 0usize..6,
            scopes in prop::collection::vec("[a-z]{1,8}", 0..4),
        ) {
            let at = position.min(roles.len());
            roles.insert(at, Role::SYSTEM_ADMIN);
            let caller = user(roles).with_subject_scopes(scopes);
            let ability = AbilityFactory::new().create_for_user(Some(&caller));

            prop_assert!(ability.can(Action::Manage, SubjectType::All));
            for subject in [SubjectType::Course, SubjectType::Lesson, SubjectType::User, SubjectType::HttpRequestLog] {
                prop_assert!(ability.can_on(Action::Manage, &AttributeBag::new(subject)));
            }
        }

        /// Property: without roles and scopes, archived courses are never readable.
        #[test]
        fn roleless_callers_never_read_archived(subject in "[a-z]{1,10}") {
            let ability = AbilityFactory::new().create_for_user(Some(&user(vec![])));
            prop_assert!(!ability.can_on(Action::Read, &course(None, None, &subject, true)));
            prop_assert!(ability.can_on(Action::Read, &course(None, None, &subject, false)));
        }
    }
}
