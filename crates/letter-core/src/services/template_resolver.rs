//! Template and employee lookup with activity checks

use crate::error::{LetterError, Result};
use crate::store::LetterStore;
use letter_types::{Employee, EmployeeId, LetterTemplate, TemplateId};
use std::sync::Arc;

pub struct TemplateResolver {
    store: Arc<dyn LetterStore>,
}

impl TemplateResolver {
    pub fn new(store: Arc<dyn LetterStore>) -> Self {
        Self { store }
    }

    /// Load an active template
    pub async fn resolve(&self, template_id: &TemplateId) -> Result<LetterTemplate> {
        let template = self
            .store
            .get_template(template_id)
            .await?
            .ok_or_else(|| LetterError::NotFound(format!("Template {}", template_id)))?;

        if !template.is_active {
            return Err(LetterError::NotFound(format!("Template {} is inactive", template_id)));
        }

        Ok(template)
    }

    /// Load an active employee
    pub async fn resolve_employee(&self, employee_id: &EmployeeId) -> Result<Employee> {
        let employee = self
            .store
            .get_employee(employee_id)
            .await?
            .ok_or_else(|| LetterError::NotFound(format!("Employee {}", employee_id)))?;

        if !employee.is_active {
            return Err(LetterError::NotFound(format!("Employee {} is inactive", employee_id)));
        }

        Ok(employee)
    }
}
