//! User profile and form-field mapping.
//!
//! Before a form field becomes a question for the human, we try to answer it
//! straight from the profile. Label matching covers the common English and
//! German field names seen on application portals.

use serde::{Deserialize, Serialize};

/// Category of an application question, used to group saved answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionCategory {
    Personal,
    Experience,
    Availability,
    Salary,
    Visa,
    Education,
    Skills,
    #[default]
    Other,
}

impl std::fmt::Display for QuestionCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Personal => write!(f, "personal"),
            Self::Experience => write!(f, "experience"),
            Self::Availability => write!(f, "availability"),
            Self::Salary => write!(f, "salary"),
            Self::Visa => write!(f, "visa"),
            Self::Education => write!(f, "education"),
            Self::Skills => write!(f, "skills"),
            Self::Other => write!(f, "other"),
        }
    }
}

impl std::str::FromStr for QuestionCategory {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "personal" => Ok(Self::Personal),
            "experience" => Ok(Self::Experience),
            "availability" => Ok(Self::Availability),
            "salary" => Ok(Self::Salary),
            "visa" => Ok(Self::Visa),
            "education" => Ok(Self::Education),
            "skills" => Ok(Self::Skills),
            "other" => Ok(Self::Other),
            _ => Err(format!("Unknown question category: {}", s)),
        }
    }
}

/// Classify a field label into a question category by keywords.
pub fn categorize_field(label: &str) -> QuestionCategory {
    let l = label.to_lowercase();
    if l.contains("salary") || l.contains("compensation") || l.contains("gehalt") {
        return QuestionCategory::Salary;
    }
    if l.contains("visa") || l.contains("work permit") || l.contains("authorization") {
        return QuestionCategory::Visa;
    }
    if l.contains("experience") || l.contains("years") || l.contains("erfahrung") {
        return QuestionCategory::Experience;
    }
    if l.contains("education") || l.contains("degree") || l.contains("university") {
        return QuestionCategory::Education;
    }
    if l.contains("available") || l.contains("start date") || l.contains("notice") {
        return QuestionCategory::Availability;
    }
    if l.contains("skill") || l.contains("proficiency") || l.contains("language") {
        return QuestionCategory::Skills;
    }
    if l.contains("name") || l.contains("email") || l.contains("phone") || l.contains("address") {
        return QuestionCategory::Personal;
    }
    QuestionCategory::Other
}

/// The applicant's profile, as maintained in settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserProfile {
    pub name: String,
    pub email: String,
    pub phone: String,
    /// "City, Country" free text.
    pub location: String,
    pub title: String,
    pub linkedin_url: String,
    pub website: String,
    pub summary: String,
}

impl UserProfile {
    fn first_name(&self) -> String {
        self.name.split_whitespace().next().unwrap_or("").to_string()
    }

    fn last_name(&self) -> String {
        self.name
            .split_whitespace()
            .skip(1)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Profile as a prompt block for the document pipeline.
    pub fn summary_block(&self) -> String {
        let mut block = String::new();
        if !self.name.is_empty() {
            block.push_str(&format!("Name: {}\n", self.name));
        }
        if !self.title.is_empty() {
            block.push_str(&format!("Current title: {}\n", self.title));
        }
        if !self.location.is_empty() {
            block.push_str(&format!("Location: {}\n", self.location));
        }
        if !self.summary.is_empty() {
            block.push_str(&format!("Summary: {}\n", self.summary));
        }
        if block.is_empty() {
            block.push_str("(no profile data)\n");
        }
        block
    }

    /// Map a form-field label to a profile value, if the label is one we
    /// recognize. Empty profile values count as "no mapping" so the question
    /// falls through to the Q&A store or the user.
    pub fn map_field(&self, field_label: &str) -> Option<String> {
        let label = field_label.to_lowercase();

        let value = if label.contains("first name") || label == "firstname" || label == "vorname" {
            self.first_name()
        } else if label.contains("last name")
            || label == "lastname"
            || label == "nachname"
            || label.contains("surname")
        {
            self.last_name()
        } else if label.contains("full name") || label == "name" {
            self.name.clone()
        } else if label.contains("email") || label.contains("e-mail") {
            self.email.clone()
        } else if label.contains("phone") || label.contains("tel") || label.contains("mobile") {
            self.phone.clone()
        } else if label.contains("city") || label.contains("stadt") {
            self.location
                .split(',')
                .next()
                .unwrap_or("")
                .trim()
                .to_string()
        } else if label.contains("country") || label.contains("land") {
            self.location
                .split(',')
                .next_back()
                .unwrap_or("")
                .trim()
                .to_string()
        } else if label.contains("address") || label.contains("location") || label.contains("adresse")
        {
            self.location.clone()
        } else if label.contains("current title")
            || label.contains("job title")
            || label.contains("position")
        {
            self.title.clone()
        } else if label.contains("linkedin") {
            self.linkedin_url.clone()
        } else if label.contains("website") || label.contains("portfolio") {
            self.website.clone()
        } else if label.contains("summary") || label.contains("about") || label.contains("introduction")
        {
            self.summary.clone()
        } else {
            return None;
        };

        if value.is_empty() { None } else { Some(value) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> UserProfile {
        UserProfile {
            name: "Jo Anne Doe".into(),
            email: "jo@example.com".into(),
            phone: "+49 151 1234".into(),
            location: "Berlin, Germany".into(),
            title: "Backend Engineer".into(),
            linkedin_url: "https://linkedin.com/in/jo".into(),
            website: "https://jo.dev".into(),
            summary: "Ten years of backend work.".into(),
        }
    }

    #[test]
    fn maps_name_fields() {
        let p = profile();
        assert_eq!(p.map_field("First Name").as_deref(), Some("Jo"));
        assert_eq!(p.map_field("Last name").as_deref(), Some("Anne Doe"));
        assert_eq!(p.map_field("Full name").as_deref(), Some("Jo Anne Doe"));
        assert_eq!(p.map_field("Vorname").as_deref(), Some("Jo"));
    }

    #[test]
    fn maps_contact_and_location_fields() {
        let p = profile();
        assert_eq!(p.map_field("E-Mail address").as_deref(), Some("jo@example.com"));
        assert_eq!(p.map_field("Phone number").as_deref(), Some("+49 151 1234"));
        assert_eq!(p.map_field("City").as_deref(), Some("Berlin"));
        assert_eq!(p.map_field("Country").as_deref(), Some("Germany"));
    }

    #[test]
    fn unknown_label_has_no_mapping() {
        assert_eq!(profile().map_field("Desired salary"), None);
        assert_eq!(profile().map_field("What is your notice period?"), None);
    }

    #[test]
    fn empty_profile_value_is_no_mapping() {
        let p = UserProfile {
            name: "Jo Doe".into(),
            ..Default::default()
        };
        assert_eq!(p.map_field("LinkedIn profile"), None);
    }

    #[test]
    fn categorizes_common_labels() {
        assert_eq!(categorize_field("Salary expectation"), QuestionCategory::Salary);
        assert_eq!(categorize_field("Do you need visa sponsorship?"), QuestionCategory::Visa);
        assert_eq!(categorize_field("Years of experience"), QuestionCategory::Experience);
        assert_eq!(categorize_field("Highest degree"), QuestionCategory::Education);
        assert_eq!(categorize_field("Notice period"), QuestionCategory::Availability);
        assert_eq!(categorize_field("Language proficiency"), QuestionCategory::Skills);
        assert_eq!(categorize_field("Email"), QuestionCategory::Personal);
        assert_eq!(categorize_field("Anything else?"), QuestionCategory::Other);
    }
}
