//! Profile operations.
//!
//! Profiles are created on first contact and never deleted; only the role
//! and language fields change afterwards.

use std::collections::HashMap;

use chrono::Utc;
use rusqlite::{OptionalExtension, params, params_from_iter};
use uuid::Uuid;

use super::models::{NewProfile, Profile, ProfileField, Role};
use super::{Database, to_db_time};
use crate::error::{DatabaseError, ServiceResult};

impl Database {
    /// Get a profile by the transport identity token
    pub fn get_profile_by_external_id(&self, external_id: &str) -> ServiceResult<Option<Profile>> {
        let conn = self.conn()?;

        conn.query_row(
            &format!(
                "SELECT {} FROM profiles WHERE external_id = ?1",
                Profile::COLUMNS
            ),
            params![external_id],
            Profile::from_row,
        )
        .optional()
        .map_err(|e| DatabaseError::Query(e).into())
    }

    /// Get a profile by its internal ID
    pub fn get_profile(&self, id: &str) -> ServiceResult<Option<Profile>> {
        let conn = self.conn()?;

        conn.query_row(
            &format!("SELECT {} FROM profiles WHERE id = ?1", Profile::COLUMNS),
            params![id],
            Profile::from_row,
        )
        .optional()
        .map_err(|e| DatabaseError::Query(e).into())
    }

    /// Create a profile. An existing profile for the same identity is kept
    /// untouched and returned instead.
    pub fn create_profile(&self, new: &NewProfile) -> ServiceResult<Profile> {
        self.insert_profile(new)?;
        self.fetch_created(&new.external_id)
    }

    /// Look up the profile for an identity, creating it on first contact.
    /// The flag is true when the profile was created by this call.
    pub fn get_or_create_profile(&self, new: &NewProfile) -> ServiceResult<(Profile, bool)> {
        if let Some(profile) = self.get_profile_by_external_id(&new.external_id)? {
            return Ok((profile, false));
        }
        let created = self.insert_profile(new)?;
        Ok((self.fetch_created(&new.external_id)?, created))
    }

    fn insert_profile(&self, new: &NewProfile) -> ServiceResult<bool> {
        let conn = self.conn()?;

        let rows = conn
            .execute(
                r#"
                INSERT INTO profiles (id, external_id, name, role, language, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(external_id) DO NOTHING
                "#,
                params![
                    Uuid::new_v4().to_string(),
                    new.external_id,
                    new.name,
                    new.role.as_ref(),
                    new.language.as_ref(),
                    to_db_time(&Utc::now()),
                ],
            )
            .map_err(DatabaseError::Query)?;

        Ok(rows == 1)
    }

    fn fetch_created(&self, external_id: &str) -> ServiceResult<Profile> {
        self.get_profile_by_external_id(external_id)?
            .ok_or_else(|| DatabaseError::Query(rusqlite::Error::QueryReturnedNoRows).into())
    }

    /// Update a single mutable profile field
    pub fn update_profile_field(&self, id: &str, field: ProfileField) -> ServiceResult<bool> {
        let conn = self.conn()?;

        let rows = match field {
            ProfileField::Role(role) => conn.execute(
                "UPDATE profiles SET role = ?2 WHERE id = ?1",
                params![id, role.as_ref()],
            ),
            ProfileField::Language(lang) => conn.execute(
                "UPDATE profiles SET language = ?2 WHERE id = ?1",
                params![id, lang.as_ref()],
            ),
        }
        .map_err(DatabaseError::Query)?;

        Ok(rows == 1)
    }

    /// List all profiles holding a role, oldest first
    pub fn list_profiles_by_role(&self, role: Role) -> ServiceResult<Vec<Profile>> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM profiles WHERE role = ?1 ORDER BY created_at, name",
                Profile::COLUMNS
            ))
            .map_err(DatabaseError::Query)?;

        let rows = stmt
            .query_map(params![role.as_ref()], Profile::from_row)
            .map_err(DatabaseError::Query)?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(DatabaseError::Query)
            .map_err(Into::into)
    }

    /// Resolve display names for many profile IDs in one query
    pub fn profile_names(&self, ids: &[&str]) -> ServiceResult<HashMap<String, String>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let conn = self.conn()?;

        let placeholders = vec!["?"; ids.len()].join(", ");
        let mut stmt = conn
            .prepare(&format!(
                "SELECT id, name FROM profiles WHERE id IN ({})",
                placeholders
            ))
            .map_err(DatabaseError::Query)?;

        let rows = stmt
            .query_map(params_from_iter(ids.iter()), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(DatabaseError::Query)?;

        rows.collect::<Result<HashMap<_, _>, _>>()
            .map_err(DatabaseError::Query)
            .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::i18n::Language;

    fn new_profile(external_id: &str, name: &str, role: Role) -> NewProfile {
        NewProfile {
            external_id: external_id.to_string(),
            name: name.to_string(),
            role,
            language: Language::Zh,
        }
    }

    #[test]
    fn test_get_or_create_profile_only_creates_once() {
        let db = Database::open_in_memory().unwrap();

        let (first, created) = db
            .get_or_create_profile(&new_profile("U1", "Amy", Role::Requester))
            .unwrap();
        assert!(created);

        let (second, created) = db
            .get_or_create_profile(&new_profile("U1", "Amy (renamed)", Role::Requester))
            .unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);
        assert_eq!(second.name, "Amy");
    }

    #[test]
    fn test_update_profile_fields() {
        let db = Database::open_in_memory().unwrap();
        let profile = db
            .create_profile(&new_profile("U2", "Bo", Role::ProviderPending))
            .unwrap();

        assert!(db
            .update_profile_field(&profile.id, ProfileField::Role(Role::Provider))
            .unwrap());
        assert!(db
            .update_profile_field(&profile.id, ProfileField::Language(Language::En))
            .unwrap());
        assert!(!db
            .update_profile_field("missing", ProfileField::Role(Role::Provider))
            .unwrap());

        let updated = db.get_profile(&profile.id).unwrap().unwrap();
        assert_eq!(updated.role, Role::Provider);
        assert_eq!(updated.language, Language::En);
    }

    #[test]
    fn test_list_by_role_and_batch_names() {
        let db = Database::open_in_memory().unwrap();
        let a = db.create_profile(&new_profile("P1", "Ms. Lin", Role::Provider)).unwrap();
        let b = db.create_profile(&new_profile("P2", "Mr. Chen", Role::Provider)).unwrap();
        db.create_profile(&new_profile("S1", "Student", Role::Requester)).unwrap();

        let providers = db.list_profiles_by_role(Role::Provider).unwrap();
        assert_eq!(providers.len(), 2);

        let names = db.profile_names(&[&a.id, &b.id, "unknown"]).unwrap();
        assert_eq!(names.len(), 2);
        assert_eq!(names[&a.id], "Ms. Lin");
        assert_eq!(names[&b.id], "Mr. Chen");

        assert!(db.profile_names(&[]).unwrap().is_empty());
    }
}
