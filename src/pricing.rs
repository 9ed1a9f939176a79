use uuid::Uuid;

use crate::models::{CourseSnapshot, Discount, DiscountKind};

/// Applies discounts in slice order on top of `base_price`. Percentage
/// discounts take their cut of the running price, so stacking is sequential
/// and order matters. The running price is clamped to zero after every step;
/// a subtraction can never leave a negative amount for the next discount to
/// amplify.
pub fn final_price(base_price: f64, discounts: &[Discount]) -> f64 {
    let mut price = base_price;
    for discount in discounts {
        price = match discount.kind {
            DiscountKind::Percentage => price - price * discount.value / 100.0,
            DiscountKind::Fixed => price - discount.value,
        }
        .max(0.0);
    }
    price.max(0.0)
}

/// Builds the ordered id set a checkout will price with: requested ids that
/// the course's allow-list admits (request order), then the course-page
/// discounts that are always applied (catalog order). Duplicates collapse to
/// a single application.
pub fn resolve_discount_ids(course: &CourseSnapshot, requested: &[Uuid]) -> Vec<Uuid> {
    let mut resolved: Vec<Uuid> = Vec::new();
    for id in requested {
        if course.discount_ids.contains(id) && !resolved.contains(id) {
            resolved.push(*id);
        }
    }
    for id in &course.page_discount_ids {
        if !resolved.contains(id) {
            resolved.push(*id);
        }
    }
    resolved
}
